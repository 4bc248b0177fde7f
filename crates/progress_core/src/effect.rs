use std::time::Duration;

use crate::StatusSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start the repeating poll timer.
    StartTicker,
    /// Cancel the repeating timer and any pending grace timer.
    StopTimers,
    /// Arm the one-shot grace timer, replacing any pending one.
    ScheduleStop { after: Duration },
    /// Disarm the pending grace timer.
    CancelStop,
    NotifyUpdate(StatusSnapshot),
    NotifyCompleted(StatusSnapshot),
    NotifyError(String),
}
