//! Progress core: job status snapshots and the pure polling state machine.
mod effect;
mod msg;
mod policy;
mod snapshot;
mod state;
mod update;

pub use effect::Effect;
pub use msg::{Msg, PollFailure};
pub use policy::PollPolicy;
pub use snapshot::{JobStatus, StatusSnapshot};
pub use state::{PollerPhase, PollerState, ProgressState, Transition};
pub use update::update;
