use thiserror::Error;

use crate::frame::ReplyClass;

/// Errors that can occur on the downward (Protocol Handler) seam, below the
/// session core. See `amqp_session::SessionError` for the taxonomy the
/// application actually observes; this type is what the transport/codec
/// side is allowed to hand back across that seam.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for reply")]
    Timeout,

    #[error("unexpected reply: expected {expected:?}, got {actual}")]
    UnexpectedReply { expected: ReplyClass, actual: String },

    /// The connection was lost and rebuilt while this round-trip was in
    /// flight. Whoever called `sync_write`/`run_guarded` decides whether
    /// that is retryable (declare, bind, consume, ...) or must be surfaced
    /// as "status uncertain" (commit, rollback, recover).
    #[error("connection failed over during round-trip")]
    Failover,

    #[error("protocol error: {0}")]
    Protocol(String),
}
