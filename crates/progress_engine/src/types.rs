use std::fmt;

use progress_core::PollFailure;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    /// Network failure or non-success response. The poller retries these.
    #[error("transport error: {0}")]
    Transport(TransportFailure),
    /// The response could not be turned into a snapshot.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StatusError {
    pub fn is_transport(&self) -> bool {
        matches!(self, StatusError::Transport(_))
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        StatusError::Protocol(message.into())
    }
}

impl From<StatusError> for PollFailure {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::Transport(_) => PollFailure::Transport(err.to_string()),
            StatusError::Protocol(_) => PollFailure::Protocol(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    InvalidUrl(String),
    HttpStatus(u16),
    Timeout,
    Network(String),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::InvalidUrl(reason) => write!(f, "invalid url: {reason}"),
            TransportFailure::HttpStatus(code) => write!(f, "http status {code}"),
            TransportFailure::Timeout => write!(f, "timeout"),
            TransportFailure::Network(reason) => write!(f, "network error: {reason}"),
        }
    }
}
