use std::sync::mpsc;

use progress_core::StatusSnapshot;

/// Receives poller notifications. Rendering lives behind this trait.
///
/// Callbacks run synchronously on the polling task and may call back into
/// the poller, including [`crate::Poller::stop`]. A panicking callback is
/// logged and does not affect polling.
pub trait ProgressSink: Send + Sync {
    fn on_update(&self, snapshot: &StatusSnapshot);
    fn on_completed(&self, snapshot: &StatusSnapshot);
    fn on_error(&self, message: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollerEvent {
    Updated(StatusSnapshot),
    Completed(StatusSnapshot),
    Failed(String),
}

/// Forwards notifications over a channel for hosts with their own loop.
pub struct ChannelProgressSink {
    tx: mpsc::Sender<PollerEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<PollerEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn on_update(&self, snapshot: &StatusSnapshot) {
        let _ = self.tx.send(PollerEvent::Updated(snapshot.clone()));
    }

    fn on_completed(&self, snapshot: &StatusSnapshot) {
        let _ = self.tx.send(PollerEvent::Completed(snapshot.clone()));
    }

    fn on_error(&self, message: &str) {
        let _ = self.tx.send(PollerEvent::Failed(message.to_owned()));
    }
}
