use std::sync::Arc;
use std::time::Duration;

use amqp_wire::{ChannelId, FailoverMutex, Method, ProtocolHandler, Reply, ReplyClass, WireError};

use crate::error::SessionError;

/// Wraps a protocol round-trip with one of the policies spec §4.2
/// describes. Every blocking call into the transport goes through one of
/// these, never straight through `ProtocolHandler`.
pub struct FailoverGuard {
    mutex: Arc<dyn FailoverMutex>,
    handler: Arc<dyn ProtocolHandler>,
}

impl FailoverGuard {
    pub fn new(mutex: Arc<dyn FailoverMutex>, handler: Arc<dyn ProtocolHandler>) -> Self {
        FailoverGuard { mutex, handler }
    }

    pub fn handler(&self) -> &Arc<dyn ProtocolHandler> {
        &self.handler
    }

    /// Retries transparently on fail-over. For idempotent round-trips:
    /// declare, bind, create-consumer, create-producer, delete-queue,
    /// is-bound.
    pub fn retrying(
        &self,
        channel: ChannelId,
        method: Method,
        expected: ReplyClass,
        timeout: Option<Duration>,
    ) -> Result<Reply, SessionError> {
        loop {
            let mut captured: Option<Reply> = None;
            let handler = &self.handler;
            let method = method.clone();
            let mut op = || {
                captured = Some(handler.sync_write(channel, method.clone(), expected, timeout)?);
                Ok(())
            };
            match self.mutex.run_guarded(&mut op) {
                Ok(()) => return Ok(captured.expect("run_guarded succeeded without capturing a reply")),
                Err(WireError::Failover) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Guarded single attempt at a fire-and-forget write; fail-over is
    /// swallowed rather than surfaced, since whatever this was doing will
    /// be redone once resubscription completes. Used for `nowait` sends.
    pub fn noop_write(&self, channel: ChannelId, method: Method) -> Result<(), SessionError> {
        let handler = &self.handler;
        let mut op = || handler.write_frame(channel, method.clone());
        match self.mutex.run_guarded(&mut op) {
            Ok(()) => Ok(()),
            Err(WireError::Failover) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Guarded single attempt; fail-over surfaces as
    /// `SessionError::FailoverInterrupted` rather than being retried.
    /// Used for commit, rollback, recover and close, where retrying could
    /// silently double-apply a side effect the application can't observe.
    pub fn uncertain(
        &self,
        channel: ChannelId,
        method: Method,
        expected: ReplyClass,
        timeout: Option<Duration>,
        operation: &'static str,
    ) -> Result<Reply, SessionError> {
        let mut captured: Option<Reply> = None;
        let handler = &self.handler;
        let mut op = || {
            captured = Some(handler.sync_write(channel, method.clone(), expected, timeout)?);
            Ok(())
        };
        match self.mutex.run_guarded(&mut op) {
            Ok(()) => Ok(captured.expect("run_guarded succeeded without capturing a reply")),
            Err(WireError::Failover) => Err(SessionError::FailoverInterrupted { operation }),
            Err(err) => Err(err.into()),
        }
    }

    /// A single attempt made *without* taking the fail-over mutex. Only
    /// valid when the caller already holds it — i.e. from inside
    /// resubscription itself, where re-entering `run_guarded` would
    /// deadlock against a non-reentrant lock. Returns `None` if a second,
    /// nested fail-over interrupts the call.
    pub fn unguarded(
        &self,
        channel: ChannelId,
        method: Method,
        expected: ReplyClass,
        timeout: Option<Duration>,
    ) -> Result<Option<Reply>, SessionError> {
        match self.handler.sync_write(channel, method, expected, timeout) {
            Ok(reply) => Ok(Some(reply)),
            Err(WireError::Failover) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
