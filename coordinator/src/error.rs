use shared::protocol::{ErrorKind, Packet};
use shared::SessionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("move ignored, too soon after last move")]
    RateLimited,

    #[error("session {0} is over")]
    SessionOver(SessionId),

    #[error("task channel unavailable: {0}")]
    TransportUnavailable(String),

    #[error("invalid result: {0}")]
    InvalidResult(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("unexpected request: {0}")]
    UnexpectedRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::NotFound(_) => ErrorKind::NotFound,
            CoordinatorError::RateLimited => ErrorKind::RateLimited,
            CoordinatorError::SessionOver(_) => ErrorKind::SessionOver,
            CoordinatorError::InvalidResult(_)
            | CoordinatorError::UnknownDelivery(_)
            | CoordinatorError::UnexpectedRequest(_)
            | CoordinatorError::Config(_) => ErrorKind::BadRequest,
            CoordinatorError::TransportUnavailable(_) | CoordinatorError::Io(_) => {
                ErrorKind::TransportUnavailable
            }
        }
    }

    /// Structured response sent back in place of the failed request.
    pub fn to_packet(&self) -> Packet {
        Packet::Error {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            CoordinatorError::NotFound("x".to_string()).kind().status_code(),
            404
        );
        assert_eq!(CoordinatorError::RateLimited.kind().status_code(), 429);
        assert_eq!(
            CoordinatorError::TransportUnavailable("down".to_string())
                .kind()
                .status_code(),
            500
        );
    }

    #[test]
    fn test_error_packet() {
        match CoordinatorError::NotFound("abc".to_string()).to_packet() {
            Packet::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::NotFound);
                assert!(message.contains("abc"));
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }
}
