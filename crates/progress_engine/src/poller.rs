use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};
use progress_core::{update, Effect, Msg, PollPolicy, PollerState, StatusSnapshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::{JobStatusClient, ProgressSink, StatusError};

#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Period of the repeating status query.
    pub interval: Duration,
    pub policy: PollPolicy,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            policy: PollPolicy::default(),
        }
    }
}

/// Shortest accepted polling period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Polls a job-status endpoint and reports progress to a [`ProgressSink`].
///
/// Cheap to clone; clones drive the same timers. At most one repeating timer
/// and one grace timer exist per poller. Ticks are serialized: the next
/// query is issued only after the previous one resolved. Sink callbacks are
/// delivered in the order the state machine produced them, also on a
/// multi-threaded runtime.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<dyn JobStatusClient>,
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
    shared: Mutex<Shared>,
    delivery: Delivery,
}

/// Turn-taking for sink callbacks. Each dispatch that produced
/// notifications draws a ticket under the state lock and waits for its turn.
#[derive(Default)]
struct Delivery {
    served: Mutex<u64>,
    turn: Condvar,
}

struct Shared {
    state: PollerState,
    /// Bumped on every start so tasks from an earlier run go quiet.
    generation: u64,
    next_seq: u64,
    next_ticket: u64,
    ticker: Option<JoinHandle<()>>,
    grace: Option<JoinHandle<()>>,
}

impl Shared {
    fn cancel_grace(&mut self) {
        if let Some(handle) = self.grace.take() {
            handle.abort();
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
        self.cancel_grace();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_timers();
    }
}

impl Poller {
    pub fn new(
        client: Arc<dyn JobStatusClient>,
        sink: Arc<dyn ProgressSink>,
        settings: PollerSettings,
    ) -> Self {
        let interval = if settings.interval < MIN_INTERVAL {
            engine_warn!(
                "Polling interval {:?} is too short, using {:?}",
                settings.interval,
                MIN_INTERVAL
            );
            MIN_INTERVAL
        } else {
            settings.interval
        };
        Self {
            inner: Arc::new(Inner {
                client,
                sink,
                interval,
                shared: Mutex::new(Shared {
                    state: PollerState::new(settings.policy),
                    generation: 0,
                    next_seq: 0,
                    next_ticket: 0,
                    ticker: None,
                    grace: None,
                }),
                delivery: Delivery::default(),
            }),
        }
    }

    /// Starts polling. Restarts from scratch if already running.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) {
        engine_info!("Starting status polling every {:?}", self.inner.interval);
        self.dispatch(None, Msg::StartRequested);
    }

    /// Stops polling and cancels any pending grace timer. No-op when stopped.
    pub fn stop(&self) {
        if self.is_active() {
            engine_info!("Stopping status polling");
        }
        self.dispatch(None, Msg::StopRequested);
    }

    pub fn is_active(&self) -> bool {
        self.lock().state.is_active()
    }

    /// Latest accepted snapshot of the current run.
    pub fn progress(&self) -> Option<StatusSnapshot> {
        self.lock().state.progress().current().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Feeds one message through the state machine. Timer effects are
    /// applied under the lock; sink callbacks run after it is released.
    fn dispatch(&self, generation: Option<u64>, msg: Msg) {
        let (ticket, notifications) = {
            let mut shared = self.lock();
            if generation.is_some_and(|generation| generation != shared.generation) {
                engine_debug!("Dropping message from a previous polling run");
                return;
            }
            let state = std::mem::take(&mut shared.state);
            let (state, effects) = update(state, msg);
            shared.state = state;

            let mut notifications = Vec::new();
            for effect in effects {
                match effect {
                    Effect::StartTicker => self.start_ticker(&mut shared),
                    Effect::StopTimers => shared.cancel_timers(),
                    Effect::ScheduleStop { after } => self.schedule_stop(&mut shared, after),
                    Effect::CancelStop => {
                        engine_info!("Job resumed after reporting a terminal status");
                        shared.cancel_grace();
                    }
                    notification => notifications.push(notification),
                }
            }
            if notifications.is_empty() {
                return;
            }
            let ticket = shared.next_ticket;
            shared.next_ticket += 1;
            (ticket, notifications)
        };

        self.deliver(ticket, notifications);
    }

    /// Runs the callbacks of one dispatch once every earlier ticket is done.
    /// Neither lock is held while a callback runs.
    fn deliver(&self, ticket: u64, notifications: Vec<Effect>) {
        let delivery = &self.inner.delivery;
        let mut served = delivery.served.lock().unwrap_or_else(PoisonError::into_inner);
        while *served != ticket {
            served = delivery
                .turn
                .wait(served)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(served);

        for notification in notifications {
            self.notify(notification);
        }

        *delivery.served.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        delivery.turn.notify_all();
    }

    fn start_ticker(&self, shared: &mut Shared) {
        shared.cancel_timers();
        shared.generation += 1;
        let generation = shared.generation;
        let period = self.inner.interval;
        let weak = Arc::downgrade(&self.inner);

        shared.ticker = Some(tokio::spawn(async move {
            // First query one period after start, like a browser interval.
            let mut ticks = time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(poller) = upgrade(&weak) else {
                    break;
                };
                if !poller.poll_once(generation).await {
                    break;
                }
            }
        }));
    }

    fn schedule_stop(&self, shared: &mut Shared, after: Duration) {
        shared.cancel_grace();
        let generation = shared.generation;
        let weak = Arc::downgrade(&self.inner);
        engine_debug!("Terminal status observed, settling for {:?}", after);

        shared.grace = Some(tokio::spawn(async move {
            time::sleep(after).await;
            if let Some(poller) = upgrade(&weak) {
                poller.dispatch(Some(generation), Msg::GraceElapsed);
            }
        }));
    }

    /// Runs one status query. Returns false once this run is over.
    async fn poll_once(&self, generation: u64) -> bool {
        let seq = {
            let mut shared = self.lock();
            if shared.generation != generation || !shared.state.is_active() {
                return false;
            }
            shared.next_seq += 1;
            shared.next_seq
        };

        let result = self.inner.client.fetch_status().await;
        match result {
            Ok(snapshot) => {
                engine_debug!(
                    "Status poll seq={} status={} percentage={}",
                    seq,
                    snapshot.status(),
                    snapshot.percentage()
                );
                let received_at = Utc::now();
                self.dispatch(
                    Some(generation),
                    Msg::PollSucceeded {
                        seq,
                        snapshot,
                        received_at,
                    },
                );
            }
            Err(err) => {
                let transport = err.is_transport();
                self.dispatch(
                    Some(generation),
                    Msg::PollFailed {
                        seq,
                        failure: err.clone().into(),
                    },
                );
                self.log_failure(seq, transport, &err);
            }
        }
        true
    }

    fn log_failure(&self, seq: u64, transport: bool, err: &StatusError) {
        if transport {
            let failures = self.lock().state.consecutive_failures();
            engine_warn!(
                "Status poll seq={} failed ({} consecutive): {}",
                seq,
                failures,
                err
            );
        } else {
            engine_error!("Status poll seq={} returned an unusable body: {}", seq, err);
        }
    }

    fn notify(&self, notification: Effect) {
        let sink = self.inner.sink.as_ref();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &notification {
            Effect::NotifyUpdate(snapshot) => sink.on_update(snapshot),
            Effect::NotifyCompleted(snapshot) => {
                engine_info!("Job completed at {}%", snapshot.percentage());
                sink.on_completed(snapshot);
            }
            Effect::NotifyError(message) => {
                engine_warn!("Job failed: {}", message);
                sink.on_error(message);
            }
            _ => {}
        }));
        if outcome.is_err() {
            engine_error!("Progress sink panicked handling {:?}", notification);
        }
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<Poller> {
    weak.upgrade().map(|inner| Poller { inner })
}
