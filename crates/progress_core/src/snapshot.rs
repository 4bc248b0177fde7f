use std::fmt;

use chrono::{DateTime, Utc};

/// Lifecycle status reported by the job-status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    /// Parses the endpoint's status token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Completed and Error are terminal: polling is expected to stop after them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// One point-in-time status report from the backend.
///
/// Built through the `with_*` methods so the count and percentage invariants
/// hold for every value: `completed <= total` whenever `total > 0`, and the
/// percentage always lies in `0..=100`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    status: JobStatus,
    completed: u64,
    total: u64,
    percentage: Option<u8>,
    current_label: Option<String>,
    last_update: DateTime<Utc>,
    seconds_since_update: Option<f64>,
    error_detail: Option<String>,
}

impl StatusSnapshot {
    pub fn new(status: JobStatus, last_update: DateTime<Utc>) -> Self {
        Self {
            status,
            completed: 0,
            total: 0,
            percentage: None,
            current_label: None,
            last_update,
            seconds_since_update: None,
            error_detail: None,
        }
    }

    pub fn with_counts(mut self, completed: u64, total: u64) -> Self {
        self.completed = if total > 0 { completed.min(total) } else { completed };
        self.total = total;
        self
    }

    /// Sets a server-supplied percentage, rounded and clamped to `0..=100`.
    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(clamp_percentage(percentage));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.current_label = Some(label.into());
        self
    }

    pub fn with_seconds_since_update(mut self, seconds: f64) -> Self {
        if seconds.is_finite() {
            self.seconds_since_update = Some(seconds.max(0.0));
        }
        self
    }

    /// Attaches error detail. Ignored unless the status is `Error`.
    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        if self.status == JobStatus::Error {
            self.error_detail = Some(detail.into());
        }
        self
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Server-supplied percentage, or one derived from the counts.
    pub fn percentage(&self) -> u8 {
        if let Some(percentage) = self.percentage {
            return percentage;
        }
        if self.total == 0 {
            return 0;
        }
        let derived = self.completed.saturating_mul(100) / self.total;
        derived.min(100) as u8
    }

    pub fn current_label(&self) -> Option<&str> {
        self.current_label.as_deref()
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn seconds_since_update(&self) -> Option<f64> {
        self.seconds_since_update
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// Age of the backend state at `now`, preferring the server's own figure.
    pub fn age_at(&self, now: DateTime<Utc>) -> f64 {
        match self.seconds_since_update {
            Some(seconds) => seconds,
            None => (now - self.last_update).num_milliseconds() as f64 / 1000.0,
        }
    }

    /// True when both snapshots describe the same progress. The relative
    /// age figure is ignored since it grows on every poll.
    pub fn same_progress(&self, other: &StatusSnapshot) -> bool {
        self.status == other.status
            && self.completed == other.completed
            && self.total == other.total
            && self.percentage() == other.percentage()
            && self.current_label == other.current_label
            && self.last_update == other.last_update
            && self.error_detail == other.error_detail
    }
}

fn clamp_percentage(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}
