use thiserror::Error;

use amqp_wire::WireError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("invalid routing key: {0}")]
    InvalidRoutingKey(String),

    #[error("session is closed")]
    Closed,

    #[error("session is not transacted")]
    NotTransacted,

    #[error("session is transacted")]
    IsTransacted,

    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("already subscribed: {0}")]
    AlreadySubscribed(String),

    #[error("timed out waiting for a reply")]
    Timeout,

    /// Fail-over interrupted an operation whose outcome cannot be
    /// determined after the fact (commit, rollback, recover, close).
    /// Never retried automatically; the caller decides how to recover.
    #[error("{operation} was interrupted by fail-over; its outcome is uncertain")]
    FailoverInterrupted { operation: &'static str },

    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl From<WireError> for SessionError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Timeout => SessionError::Timeout,
            WireError::Failover => SessionError::FailoverInterrupted { operation: "round-trip" },
            WireError::Protocol(msg) => SessionError::ProtocolError(msg),
            WireError::UnexpectedReply { expected, actual } => {
                SessionError::ProtocolError(format!("expected {:?}, got {}", expected, actual))
            }
            WireError::Io(err) => SessionError::ProtocolError(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
