use crate::{
    Effect, JobStatus, Msg, PollFailure, PollerPhase, PollerState, StatusSnapshot, Transition,
};

const FALLBACK_ERROR: &str = "job failed";

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: PollerState, msg: Msg) -> (PollerState, Vec<Effect>) {
    let effects = match msg {
        Msg::StartRequested => {
            let mut effects = Vec::with_capacity(2);
            if state.is_active() {
                effects.push(Effect::StopTimers);
            }
            state.begin();
            effects.push(Effect::StartTicker);
            effects
        }
        Msg::StopRequested => {
            if state.is_active() {
                state.set_phase(PollerPhase::Stopped);
                vec![Effect::StopTimers]
            } else {
                Vec::new()
            }
        }
        Msg::PollSucceeded {
            seq,
            snapshot,
            received_at,
        } => {
            // A fetch may resolve after stop(); it must not revive anything.
            if !state.is_active() || !state.accept_seq(seq) {
                return (state, Vec::new());
            }
            state.clear_failures();
            let transition = state.progress_mut().apply(snapshot.clone(), received_at);
            match transition {
                Transition::Updated => vec![Effect::NotifyUpdate(snapshot)],
                Transition::BecameTerminal => {
                    state.set_phase(PollerPhase::Settling);
                    let after = state.policy().grace_period;
                    vec![
                        Effect::NotifyUpdate(snapshot),
                        Effect::ScheduleStop { after },
                    ]
                }
                Transition::ResumedAfterTerminal => {
                    state.set_phase(PollerPhase::Running);
                    vec![Effect::CancelStop, Effect::NotifyUpdate(snapshot)]
                }
                Transition::Unchanged | Transition::Discarded => Vec::new(),
            }
        }
        Msg::PollFailed { seq, failure } => {
            if !state.is_active() || !state.accept_seq(seq) {
                return (state, Vec::new());
            }
            match failure {
                PollFailure::Transport(message) => {
                    let failures = state.record_failure();
                    let exceeded = state
                        .policy()
                        .max_consecutive_failures
                        .is_some_and(|max| failures > max);
                    if exceeded {
                        state.set_phase(PollerPhase::Stopped);
                        vec![Effect::StopTimers, Effect::NotifyError(message)]
                    } else {
                        Vec::new()
                    }
                }
                PollFailure::Protocol(message) => {
                    state.set_phase(PollerPhase::Stopped);
                    vec![Effect::StopTimers, Effect::NotifyError(message)]
                }
            }
        }
        Msg::GraceElapsed => {
            // A resume or a stop may have raced the timer.
            if state.phase() != PollerPhase::Settling || !state.progress().is_settling() {
                return (state, Vec::new());
            }
            let terminal = state.progress().current().cloned();
            state.set_phase(PollerPhase::Stopped);
            let mut effects = vec![Effect::StopTimers];
            if let Some(snapshot) = terminal {
                effects.push(terminal_effect(snapshot));
            }
            effects
        }
    };

    (state, effects)
}

fn terminal_effect(snapshot: StatusSnapshot) -> Effect {
    if snapshot.status() == JobStatus::Completed {
        return Effect::NotifyCompleted(snapshot);
    }
    let message = snapshot.error_detail().unwrap_or(FALLBACK_ERROR);
    Effect::NotifyError(message.to_owned())
}
