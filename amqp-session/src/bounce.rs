use amqp_wire::{Bounce, MessageProperties};
use bytes::Bytes;

/// Classifies a server "return" by its reply code. `312`/`313` are the
/// codes a real broker uses for unroutable and consumer-less mandatory
/// publishes; anything else is folded into `Undelivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BounceKind {
    NoRoute,
    NoConsumers,
    Undelivered,
}

impl BounceKind {
    fn from_reply_code(code: u16) -> BounceKind {
        match code {
            312 => BounceKind::NoRoute,
            313 => BounceKind::NoConsumers,
            _ => BounceKind::Undelivered,
        }
    }
}

/// A typed asynchronous error for an unroutable mandatory/immediate
/// publish, carrying the original message back to the application
/// (spec §8 scenario 4: "the connection error callback receives a
/// `no-route` error carrying the original payload").
#[derive(Debug, Clone)]
pub struct BounceError {
    pub kind: BounceKind,
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Bytes,
}

/// Routes bounced (undeliverable mandatory/immediate) publishes back to
/// the application (spec C10). Runs on a connection work thread, never on
/// the network thread.
pub struct BounceRouter {
    sink: Box<dyn Fn(BounceError) + Send + Sync>,
}

impl BounceRouter {
    pub fn new(sink: Box<dyn Fn(BounceError) + Send + Sync>) -> Self {
        BounceRouter { sink }
    }

    pub fn route(&self, bounce: Bounce) {
        (self.sink)(BounceError {
            kind: BounceKind::from_reply_code(bounce.reply_code),
            reply_code: bounce.reply_code,
            reply_text: bounce.reply_text,
            exchange: bounce.exchange,
            routing_key: bounce.routing_key,
            properties: bounce.properties,
            body: bounce.body,
        });
    }
}
