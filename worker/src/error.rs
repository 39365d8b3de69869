use shared::protocol::{ErrorKind, ProtocolError};
use shared::task::TaskError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("coordinator closed the connection")]
    Disconnected,

    #[error("coordinator refused the request ({kind:?}): {message}")]
    Rejected { kind: ErrorKind, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WorkerError {
    /// Errors after which the connection can no longer be trusted to be in
    /// step with the coordinator.
    pub fn breaks_link(&self) -> bool {
        matches!(
            self,
            WorkerError::Protocol(_)
                | WorkerError::Io(_)
                | WorkerError::Disconnected
                | WorkerError::UnexpectedResponse(_)
                | WorkerError::Timeout(_)
        )
    }
}
