//! The public-facing crate: a `Connection` factory that owns a
//! `ProtocolHandler` implementation and a fail-over mutex, and hands out
//! `amqp_session::Session`s (see `SPEC_FULL.md`'s crate layout). The wire
//! codec and transport themselves stay out of scope, same as for
//! `amqp-session` — an application wires its own `ProtocolHandler` up to a
//! socket and a codec, and this crate is the seam in between that and the
//! session runtime.

#[macro_use]
extern crate log;

mod connection;
mod heartbeat;

pub use crate::connection::{Connection, ConnectionFailoverMutex};
pub use crate::heartbeat::Heartbeat;

pub use amqp_session::{
    AckMode, BounceError, BounceKind, Browser, Consumer, ConsumerOptions, Destination,
    DestinationKind, MessageListener, OutboundMessage, Producer, ProducerOptions, Session,
    SessionConfig, SessionError,
};
pub use amqp_wire::{
    ChannelId, Delivery, FailoverMutex, FieldTable, FieldValue, Message, Method, ProtocolHandler,
    Reply, ReplyClass, WireError,
};
