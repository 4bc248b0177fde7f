use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, Once, OnceLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use pretty_assertions::assert_eq;
use progress_engine::{
    ChannelProgressSink, JobStatus, JobStatusClient, PollPolicy, Poller, PollerEvent,
    PollerRegistry, PollerSettings, ProgressSink, StatusError, StatusSnapshot, TransportFailure,
};
use tokio::time::{self, Instant};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

/// Replays a fixed list of responses, then repeats the last one.
struct ScriptedClient {
    script: Mutex<VecDeque<Result<StatusSnapshot, StatusError>>>,
    last: Mutex<Option<Result<StatusSnapshot, StatusError>>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(script: Vec<Result<StatusSnapshot, StatusError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl JobStatusClient for ScriptedClient {
    async fn fetch_status(&self) -> Result<StatusSnapshot, StatusError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last.clone().expect("script must not be empty"),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(Instant, PollerEvent)>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<PollerEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn update_percentages(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PollerEvent::Updated(snapshot) => Some(snapshot.percentage()),
                _ => None,
            })
            .collect()
    }

    fn terminal_events(&self) -> Vec<(Instant, PollerEvent)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, event)| !matches!(event, PollerEvent::Updated(_)))
            .cloned()
            .collect()
    }

    fn record(&self, event: PollerEvent) {
        self.events.lock().unwrap().push((Instant::now(), event));
    }
}

impl ProgressSink for RecordingSink {
    fn on_update(&self, snapshot: &StatusSnapshot) {
        self.record(PollerEvent::Updated(snapshot.clone()));
    }

    fn on_completed(&self, snapshot: &StatusSnapshot) {
        self.record(PollerEvent::Completed(snapshot.clone()));
    }

    fn on_error(&self, message: &str) {
        self.record(PollerEvent::Failed(message.to_string()));
    }
}

struct Timeline {
    base: DateTime<Utc>,
}

impl Timeline {
    fn new() -> Self {
        Self { base: Utc::now() }
    }

    fn at(&self, secs: i64) -> DateTime<Utc> {
        self.base + TimeDelta::seconds(secs)
    }

    fn running(&self, percent: f64, updated: i64) -> Result<StatusSnapshot, StatusError> {
        Ok(StatusSnapshot::new(JobStatus::Running, self.at(updated)).with_percentage(percent))
    }

    fn completed(&self, updated: i64) -> Result<StatusSnapshot, StatusError> {
        Ok(StatusSnapshot::new(JobStatus::Completed, self.at(updated)).with_percentage(100.0))
    }

    fn failed(&self, detail: &str, updated: i64) -> Result<StatusSnapshot, StatusError> {
        Ok(StatusSnapshot::new(JobStatus::Error, self.at(updated)).with_error(detail))
    }
}

fn refused() -> Result<StatusSnapshot, StatusError> {
    Err(StatusError::Transport(TransportFailure::Network(
        "connection refused".to_string(),
    )))
}

fn poller_with(client: Arc<ScriptedClient>, sink: Arc<dyn ProgressSink>) -> Poller {
    Poller::new(client, sink, PollerSettings::default())
}

#[tokio::test(start_paused = true)]
async fn completes_once_after_grace_period() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.running(40.0, 0), t.running(70.0, 1), t.completed(2)]);
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(client.clone(), sink.clone());

    let started = Instant::now();
    poller.start();
    time::sleep(Duration::from_secs(10)).await;

    assert_eq!(sink.update_percentages(), vec![40, 70, 100]);
    let terminal = sink.terminal_events();
    assert_eq!(terminal.len(), 1);
    let (fired_at, event) = &terminal[0];
    match event {
        PollerEvent::Completed(snapshot) => assert_eq!(snapshot.percentage(), 100),
        other => panic!("unexpected terminal event {other:?}"),
    }
    // Third snapshot at 3s, plus the 2s grace period.
    let elapsed = fired_at.duration_since(started);
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));

    // At least one poll happened inside the grace window, none after the stop.
    assert!(!poller.is_active());
    let calls = client.calls();
    assert!(calls >= 4);
    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(client.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn running_after_completed_cancels_pending_stop() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![
        t.running(50.0, 0),
        t.completed(1),
        t.running(60.0, 2),
        t.running(80.0, 3),
        t.completed(4),
    ]);
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(client, sink.clone());

    let started = Instant::now();
    poller.start();
    time::sleep(Duration::from_secs(4)).await;
    assert!(poller.is_active());
    assert!(sink.terminal_events().is_empty());

    time::sleep(Duration::from_secs(6)).await;
    assert_eq!(sink.update_percentages(), vec![50, 100, 60, 80, 100]);
    let terminal = sink.terminal_events();
    assert_eq!(terminal.len(), 1);
    assert!(matches!(terminal[0].1, PollerEvent::Completed(_)));
    assert!(terminal[0].0.duration_since(started) >= Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn starting_twice_keeps_a_single_timer() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.running(10.0, 0)]);
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(client.clone(), sink);

    poller.start();
    poller.start();
    time::sleep(Duration::from_millis(3500)).await;

    assert_eq!(client.calls(), 3);
    assert!(poller.is_active());
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn restart_forgets_previous_progress() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.running(30.0, 0)]);
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(client, sink);

    poller.start();
    time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(poller.progress().map(|snapshot| snapshot.percentage()), Some(30));

    poller.start();
    assert_eq!(poller.progress(), None);
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.running(10.0, 0)]);
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(client.clone(), sink.clone());

    poller.stop();
    poller.start();
    time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(client.calls(), 1);

    poller.stop();
    poller.stop();
    poller.stop();
    time::sleep(Duration::from_secs(5)).await;

    assert!(!poller.is_active());
    assert_eq!(client.calls(), 1);
    assert!(sink.terminal_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transport_errors_below_ceiling_are_tolerated() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![
        refused(),
        refused(),
        refused(),
        refused(),
        refused(),
        t.running(10.0, 0),
    ]);
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(client.clone(), sink.clone());

    poller.start();
    time::sleep(Duration::from_millis(8500)).await;

    assert_eq!(client.calls(), 8);
    assert_eq!(sink.update_percentages(), vec![10]);
    assert!(sink.terminal_events().is_empty());
    assert!(poller.is_active());
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn transport_errors_above_ceiling_stop_polling() {
    init_logging();
    let client = ScriptedClient::new(vec![refused()]);
    let sink = Arc::new(RecordingSink::default());
    let settings = PollerSettings {
        policy: PollPolicy {
            max_consecutive_failures: Some(2),
            ..PollPolicy::default()
        },
        ..PollerSettings::default()
    };
    let poller = Poller::new(client.clone(), sink.clone(), settings);

    poller.start();
    time::sleep(Duration::from_secs(10)).await;

    assert_eq!(client.calls(), 3);
    assert_eq!(
        sink.events(),
        vec![PollerEvent::Failed(
            "transport error: network error: connection refused".to_string()
        )]
    );
    assert!(!poller.is_active());
}

#[tokio::test(start_paused = true)]
async fn error_snapshot_reports_detail_once() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.running(20.0, 0), t.failed("disk full", 1)]);
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(client.clone(), sink.clone());

    let started = Instant::now();
    poller.start();
    time::sleep(Duration::from_secs(10)).await;

    let terminal = sink.terminal_events();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].1, PollerEvent::Failed("disk full".to_string()));
    assert!(terminal[0].0.duration_since(started) >= Duration::from_secs(4));
    assert!(!poller.is_active());

    let calls = client.calls();
    time::sleep(Duration::from_secs(5)).await;
    assert_eq!(client.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn protocol_error_stops_immediately() {
    init_logging();
    let client = ScriptedClient::new(vec![Err(StatusError::Protocol(
        "unknown status \"paused\"".to_string(),
    ))]);
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(client.clone(), sink.clone());

    poller.start();
    time::sleep(Duration::from_secs(5)).await;

    assert_eq!(client.calls(), 1);
    assert_eq!(
        sink.events(),
        vec![PollerEvent::Failed(
            "protocol error: unknown status \"paused\"".to_string()
        )]
    );
    assert!(!poller.is_active());
}

/// Stops the poller from inside the update callback.
struct StoppingSink {
    poller: OnceLock<Poller>,
    updates: AtomicUsize,
}

impl ProgressSink for StoppingSink {
    fn on_update(&self, _snapshot: &StatusSnapshot) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if let Some(poller) = self.poller.get() {
            poller.stop();
        }
    }

    fn on_completed(&self, _snapshot: &StatusSnapshot) {}

    fn on_error(&self, _message: &str) {}
}

#[tokio::test(start_paused = true)]
async fn stop_from_inside_a_callback_is_safe() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.running(10.0, 0), t.running(20.0, 1)]);
    let sink = Arc::new(StoppingSink {
        poller: OnceLock::new(),
        updates: AtomicUsize::new(0),
    });
    let poller = poller_with(client.clone(), sink.clone());
    let _ = sink.poller.set(poller.clone());

    poller.start();
    time::sleep(Duration::from_secs(5)).await;

    assert_eq!(client.calls(), 1);
    assert_eq!(sink.updates.load(Ordering::SeqCst), 1);
    assert!(!poller.is_active());
}

/// Panics on the first update, records everything else.
#[derive(Default)]
struct PanickySink {
    panicked: AtomicBool,
    inner: RecordingSink,
}

impl ProgressSink for PanickySink {
    fn on_update(&self, snapshot: &StatusSnapshot) {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("render failed");
        }
        self.inner.on_update(snapshot);
    }

    fn on_completed(&self, snapshot: &StatusSnapshot) {
        self.inner.on_completed(snapshot);
    }

    fn on_error(&self, message: &str) {
        self.inner.on_error(message);
    }
}

#[tokio::test(start_paused = true)]
async fn sink_panic_does_not_stop_polling() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.running(40.0, 0), t.running(70.0, 1), t.completed(2)]);
    let sink = Arc::new(PanickySink::default());
    let poller = poller_with(client, sink.clone());

    poller.start();
    time::sleep(Duration::from_secs(10)).await;

    assert!(sink.panicked.load(Ordering::SeqCst));
    assert_eq!(sink.inner.update_percentages(), vec![70, 100]);
    assert_eq!(sink.inner.terminal_events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn channel_sink_forwards_events_in_order() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.running(40.0, 0), t.completed(1)]);
    let (tx, rx) = mpsc::channel();
    let poller = poller_with(client, Arc::new(ChannelProgressSink::new(tx)));

    poller.start();
    time::sleep(Duration::from_secs(6)).await;

    let percentages: Vec<(&str, u8)> = rx
        .try_iter()
        .map(|event| match event {
            PollerEvent::Updated(snapshot) => ("update", snapshot.percentage()),
            PollerEvent::Completed(snapshot) => ("completed", snapshot.percentage()),
            PollerEvent::Failed(_) => ("failed", 0),
        })
        .collect();
    assert_eq!(
        percentages,
        vec![("update", 40), ("update", 100), ("completed", 100)]
    );
}

#[tokio::test(start_paused = true)]
async fn registry_keeps_one_poller_per_job() {
    init_logging();
    let t = Timeline::new();
    let registry = PollerRegistry::new();
    let first_client = ScriptedClient::new(vec![t.running(10.0, 0)]);
    let second_client = ScriptedClient::new(vec![t.running(10.0, 0)]);
    let sink = Arc::new(RecordingSink::default());

    let first = registry.start("monthly-revenue", poller_with(first_client.clone(), sink.clone()));
    time::sleep(Duration::from_millis(1500)).await;
    let second = registry.start("monthly-revenue", poller_with(second_client.clone(), sink));
    time::sleep(Duration::from_millis(2200)).await;

    assert!(!first.is_active());
    assert!(second.is_active());
    assert_eq!(first_client.calls(), 1);
    assert_eq!(second_client.calls(), 2);
    assert_eq!(registry.active_keys(), vec!["monthly-revenue".to_string()]);
    assert!(registry.get("monthly-revenue").is_some());

    assert!(registry.stop("monthly-revenue"));
    assert!(!registry.stop("monthly-revenue"));
    assert!(!second.is_active());
    assert!(registry.active_keys().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_starts_leave_one_active_poller() {
    init_logging();
    let t = Timeline::new();
    let runtime = tokio::runtime::Handle::current();

    for _ in 0..500 {
        let registry = PollerRegistry::new();
        let pollers: Vec<Poller> = std::thread::scope(|scope| {
            let starts: Vec<_> = (0..2)
                .map(|_| {
                    let client = ScriptedClient::new(vec![t.running(10.0, 0)]);
                    let poller = poller_with(client, Arc::new(RecordingSink::default()));
                    let registry = &registry;
                    let runtime = runtime.clone();
                    scope.spawn(move || {
                        let _entered = runtime.enter();
                        registry.start("job", poller)
                    })
                })
                .collect();
            starts
                .into_iter()
                .map(|start| start.join().unwrap())
                .collect()
        });

        let active = pollers.iter().filter(|poller| poller.is_active()).count();
        assert_eq!(active, 1);
        assert!(registry.stop("job"));
        assert!(pollers.iter().all(|poller| !poller.is_active()));
    }
}

#[tokio::test(start_paused = true)]
async fn zero_interval_still_polls() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.running(10.0, 0)]);
    let sink = Arc::new(RecordingSink::default());
    let settings = PollerSettings {
        interval: Duration::ZERO,
        ..PollerSettings::default()
    };
    let poller = Poller::new(client.clone(), sink.clone(), settings);

    poller.start();
    time::sleep(Duration::from_millis(10)).await;

    assert!(poller.is_active());
    assert!(client.calls() >= 5, "{} calls", client.calls());
    assert_eq!(sink.update_percentages(), vec![10]);
    poller.stop();
}

/// Takes a while to render updates and records each event when done.
#[derive(Default)]
struct SlowSink {
    inner: RecordingSink,
}

impl ProgressSink for SlowSink {
    fn on_update(&self, snapshot: &StatusSnapshot) {
        std::thread::sleep(Duration::from_millis(20));
        self.inner.on_update(snapshot);
    }

    fn on_completed(&self, snapshot: &StatusSnapshot) {
        self.inner.on_completed(snapshot);
    }

    fn on_error(&self, message: &str) {
        self.inner.on_error(message);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completion_is_delivered_after_the_last_update() {
    init_logging();
    let t = Timeline::new();
    let client = ScriptedClient::new(vec![t.completed(0)]);
    let sink = Arc::new(SlowSink::default());
    let settings = PollerSettings {
        interval: Duration::from_millis(5),
        policy: PollPolicy {
            grace_period: Duration::from_millis(1),
            ..PollPolicy::default()
        },
    };
    let poller = Poller::new(client, sink.clone(), settings);

    poller.start();
    time::sleep(Duration::from_millis(300)).await;

    let events = sink.inner.events();
    assert!(!poller.is_active());
    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(events[0], PollerEvent::Updated(_)));
    assert!(matches!(events[1], PollerEvent::Completed(_)));
}
