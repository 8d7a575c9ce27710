//! An in-memory stand-in for the downward (Protocol Handler) seam, used
//! by every integration test in this directory in place of a real
//! transport (`SPEC_FULL.md` §2.4). Analogous to how `mqtt-sync-client`
//! is exercised through its `io::{Sender, Receiver}` traits rather than a
//! real socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use amqp_wire::{ChannelId, Method, ProtocolHandler, Reply, ReplyClass, WireError};

/// Records every frame it was asked to write/sync-write and answers
/// `sync_write` immediately with a plausible reply for the requested
/// class, unless told to raise a fail-over for the next N matching
/// round-trips.
pub struct FakeProtocolHandler {
    pub writes: Mutex<Vec<Method>>,
    fail_on: Mutex<Option<ReplyClass>>,
    queue_seq: AtomicU64,
}

impl FakeProtocolHandler {
    pub fn new() -> Self {
        FakeProtocolHandler {
            writes: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            queue_seq: AtomicU64::new(0),
        }
    }

    /// Makes the next `sync_write` for `class` fail over instead of
    /// succeeding; cleared after it fires once.
    pub fn fail_over_next(&self, class: ReplyClass) {
        *self.fail_on.lock() = Some(class);
    }

    pub fn writes_snapshot(&self) -> Vec<Method> {
        self.writes.lock().clone()
    }
}

impl ProtocolHandler for FakeProtocolHandler {
    fn write_frame(&self, _channel: ChannelId, method: Method) -> Result<(), WireError> {
        self.writes.lock().push(method);
        Ok(())
    }

    fn sync_write(
        &self,
        _channel: ChannelId,
        method: Method,
        expected: ReplyClass,
        _timeout: Option<Duration>,
    ) -> Result<Reply, WireError> {
        {
            let mut fail_on = self.fail_on.lock();
            if *fail_on == Some(expected) {
                *fail_on = None;
                return Err(WireError::Failover);
            }
        }

        self.writes.lock().push(method);

        Ok(match expected {
            ReplyClass::ExchangeDeclareOk => Reply::ExchangeDeclareOk,
            ReplyClass::QueueDeclareOk => Reply::QueueDeclareOk {
                queue: format!("queue-{}", self.queue_seq.fetch_add(1, Ordering::SeqCst)),
                message_count: 0,
                consumer_count: 0,
            },
            ReplyClass::QueueBindOk => Reply::QueueBindOk,
            ReplyClass::QueueDeleteOk => Reply::QueueDeleteOk { message_count: 0 },
            ReplyClass::ExchangeBoundOk => Reply::ExchangeBoundOk { reply_code: 0, reply_text: String::new() },
            ReplyClass::BasicConsumeOk => Reply::BasicConsumeOk {
                consumer_tag: match &method {
                    Method::BasicConsume { consumer_tag, .. } => consumer_tag.clone(),
                    _ => "ctag".into(),
                },
            },
            ReplyClass::BasicRecoverOk => Reply::BasicRecoverOk,
            ReplyClass::TxSelectOk => Reply::TxSelectOk,
            ReplyClass::TxCommitOk => Reply::TxCommitOk,
            ReplyClass::TxRollbackOk => Reply::TxRollbackOk,
            ReplyClass::ChannelFlowOk => Reply::ChannelFlowOk {
                active: matches!(method, Method::ChannelFlow { active: true }),
            },
            ReplyClass::ChannelCloseOk => Reply::ChannelCloseOk,
        })
    }

    fn close_session(&self, _channel: ChannelId) -> Result<(), WireError> {
        Ok(())
    }

    fn generate_queue_name(&self) -> String {
        format!("generated-{}", self.queue_seq.fetch_add(1, Ordering::SeqCst))
    }

    fn protocol_major_version(&self) -> u8 {
        0
    }

    fn protocol_minor_version(&self) -> u8 {
        9
    }
}

pub struct NullFailoverMutex;

impl amqp_wire::FailoverMutex for NullFailoverMutex {
    fn run_guarded(&self, op: &mut dyn FnMut() -> Result<(), WireError>) -> Result<(), WireError> {
        op()
    }
}
