use chrono::{DateTime, TimeDelta, Utc};

use crate::{JobStatus, PollPolicy, StatusSnapshot};

/// Outcome of applying one snapshot to a [`ProgressState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Updated,
    BecameTerminal,
    ResumedAfterTerminal,
    Unchanged,
    /// Out-of-order or superseded snapshot; nothing was recorded.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Settling {
    /// Backend timestamp of the terminal snapshot that started settling.
    since_update: DateTime<Utc>,
    deadline: DateTime<Utc>,
}

/// Lifecycle tracking for one in-flight job.
///
/// While settling, `current` always holds a terminal snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressState {
    policy: PollPolicy,
    current: Option<StatusSnapshot>,
    settling: Option<Settling>,
}

impl ProgressState {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            current: None,
            settling: None,
        }
    }

    pub fn current(&self) -> Option<&StatusSnapshot> {
        self.current.as_ref()
    }

    pub fn is_settling(&self) -> bool {
        self.settling.is_some()
    }

    pub fn settle_deadline(&self) -> Option<DateTime<Utc>> {
        self.settling.map(|settling| settling.deadline)
    }

    /// Applies a snapshot observed at `now` and reports what changed.
    pub fn apply(&mut self, snapshot: StatusSnapshot, now: DateTime<Utc>) -> Transition {
        if let Some(current) = &self.current {
            if snapshot.last_update() < current.last_update() {
                return Transition::Discarded;
            }
        }

        if let Some(settling) = self.settling {
            if snapshot.status().is_terminal() {
                // Keep the original deadline; only the displayed values move.
                return self.replace(snapshot);
            }
            let resumed = snapshot.status() == JobStatus::Running
                && snapshot.last_update() > settling.since_update
                && self.is_fresh(&snapshot, now);
            if !resumed {
                return Transition::Discarded;
            }
            self.settling = None;
            self.current = Some(snapshot);
            return Transition::ResumedAfterTerminal;
        }

        if snapshot.status().is_terminal() {
            let deadline = TimeDelta::from_std(self.policy.grace_period)
                .ok()
                .and_then(|grace| now.checked_add_signed(grace))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.settling = Some(Settling {
                since_update: snapshot.last_update(),
                deadline,
            });
            self.current = Some(snapshot);
            return Transition::BecameTerminal;
        }

        self.replace(snapshot)
    }

    fn replace(&mut self, snapshot: StatusSnapshot) -> Transition {
        let unchanged = self
            .current
            .as_ref()
            .is_some_and(|current| current.same_progress(&snapshot));
        self.current = Some(snapshot);
        if unchanged {
            Transition::Unchanged
        } else {
            Transition::Updated
        }
    }

    fn is_fresh(&self, snapshot: &StatusSnapshot, now: DateTime<Utc>) -> bool {
        snapshot.age_at(now) <= self.policy.freshness_window.as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollerPhase {
    #[default]
    Stopped,
    Running,
    Settling,
}

/// Everything the poller decides on, minus the timers themselves.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollerState {
    policy: PollPolicy,
    phase: PollerPhase,
    progress: ProgressState,
    consecutive_failures: u32,
    last_seq: Option<u64>,
}

impl PollerState {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            progress: ProgressState::new(policy.clone()),
            policy,
            phase: PollerPhase::Stopped,
            consecutive_failures: 0,
            last_seq: None,
        }
    }

    pub fn phase(&self) -> PollerPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != PollerPhase::Stopped
    }

    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Resets job tracking and enters `Running`.
    pub(crate) fn begin(&mut self) {
        self.progress = ProgressState::new(self.policy.clone());
        self.phase = PollerPhase::Running;
        self.consecutive_failures = 0;
        self.last_seq = None;
    }

    pub(crate) fn set_phase(&mut self, phase: PollerPhase) {
        self.phase = phase;
    }

    pub(crate) fn progress_mut(&mut self) -> &mut ProgressState {
        &mut self.progress
    }

    /// Records `seq` if it is newer than anything seen; false for stale polls.
    pub(crate) fn accept_seq(&mut self, seq: u64) -> bool {
        if self.last_seq.is_some_and(|last| seq <= last) {
            return false;
        }
        self.last_seq = Some(seq);
        true
    }

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub(crate) fn clear_failures(&mut self) {
        self.consecutive_failures = 0;
    }
}
