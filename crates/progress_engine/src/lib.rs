//! Progress engine: status fetching, timers and sink notification.
mod client;
mod poller;
mod registry;
mod sink;
mod types;
mod wire;

pub use client::{ClientSettings, JobStatusClient, ReqwestStatusClient};
pub use poller::{Poller, PollerSettings};
pub use registry::PollerRegistry;
pub use sink::{ChannelProgressSink, PollerEvent, ProgressSink};
pub use types::{StatusError, TransportFailure};
pub use wire::decode_status;

pub use progress_core::{JobStatus, PollPolicy, StatusSnapshot};
