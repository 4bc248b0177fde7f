use std::time::Duration;

/// Tunables for settling and failure escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// How long a terminal status must hold before polling stops.
    pub grace_period: Duration,
    /// Maximum age of a `Running` snapshot that may cancel settling.
    pub freshness_window: Duration,
    /// Consecutive transport failures tolerated before giving up.
    /// `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(2000),
            freshness_window: Duration::from_secs(5),
            max_consecutive_failures: None,
        }
    }
}
