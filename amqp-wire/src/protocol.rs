use std::time::Duration;

use crate::error::WireError;
use crate::frame::{ChannelId, Method, Reply, ReplyClass};

/// The downward interface the session core requires from the transport
/// (spec §6, "Downward (Protocol Handler) API"). Bit-exact framing and
/// protocol-version negotiation live on the implementor's side of this
/// trait; the session core only ever calls through it.
pub trait ProtocolHandler: Send + Sync {
    /// Fire-and-forget write. Used for `nowait` variants and for
    /// `basic.ack`/`basic.reject`, which have no reply at all.
    fn write_frame(&self, channel: ChannelId, method: Method) -> Result<(), WireError>;

    /// Issue `method` and block until a reply of `expected` class arrives,
    /// a different reply/timeout/fail-over interrupts the wait, or the
    /// handler's own error occurs.
    fn sync_write(
        &self,
        channel: ChannelId,
        method: Method,
        expected: ReplyClass,
        timeout: Option<Duration>,
    ) -> Result<Reply, WireError>;

    /// Transport-side bookkeeping that must happen before a channel is
    /// considered gone, regardless of whether `channel.close-ok` is ever
    /// observed.
    fn close_session(&self, channel: ChannelId) -> Result<(), WireError>;

    /// A deterministic, unique name for a client-named queue (used when a
    /// destination's `isNameRequired` flag is set during resubscription).
    fn generate_queue_name(&self) -> String;

    fn protocol_major_version(&self) -> u8;
    fn protocol_minor_version(&self) -> u8;

    /// Fire-and-forget keep-alive write, scheduled by the owning
    /// connection on a timer (not part of spec §6's frame classes; see
    /// `SPEC_FULL.md` §5's supplemented heartbeat behavior). Default is a
    /// no-op so implementors that don't need one don't have to care.
    fn send_heartbeat(&self) -> Result<(), WireError> {
        Ok(())
    }
}

/// The connection's fail-over mutex. A round-trip runs entirely inside
/// `run_guarded`; the fail-over process takes the same mutex to rebuild
/// channels, so the two can never interleave — a running round-trip either
/// completes before fail-over starts, or the transport aborts it (returning
/// `WireError::Failover` from inside the closure) before fail-over can
/// proceed.
///
/// `op` is `FnMut() -> Result<(), WireError>` rather than returning a
/// `Reply` directly so callers can capture whatever the closure produces
/// into an owned variable instead of threading it through the trait object.
pub trait FailoverMutex: Send + Sync {
    fn run_guarded(&self, op: &mut dyn FnMut() -> Result<(), WireError>) -> Result<(), WireError>;
}
