use chrono::{DateTime, Utc};

use crate::StatusSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Host asked the poller to start (or restart) polling.
    StartRequested,
    /// Host asked the poller to stop.
    StopRequested,
    /// A status fetch resolved with a snapshot.
    PollSucceeded {
        seq: u64,
        snapshot: StatusSnapshot,
        received_at: DateTime<Utc>,
    },
    /// A status fetch failed.
    PollFailed { seq: u64, failure: PollFailure },
    /// The one-shot grace timer fired.
    GraceElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollFailure {
    /// Network or non-success response; retried.
    Transport(String),
    /// Response could not be understood; fatal for the job.
    Protocol(String),
}
