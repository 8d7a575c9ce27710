//! Client-side session runtime for a framed messaging protocol (spec §1):
//! exchange/queue declaration and binding, producers and consumers,
//! inbound delivery dispatch, acknowledgement, local transactions,
//! recovery, and fail-over-safe resubscription.
//!
//! The wire codec, the transport and the broker itself are out of scope
//! here — see `amqp_wire::ProtocolHandler`, the only seam this crate
//! reaches through to talk to any of that.

#[macro_use]
extern crate log;

mod bounce;
mod browser;
mod config;
mod consumer;
mod destination;
mod dispatcher;
mod error;
mod failover;
mod producer;
mod queue;
mod registry;
mod session;
mod subscription;
mod worker;

pub use crate::bounce::{BounceError, BounceKind, BounceRouter};
pub use crate::browser::Browser;
pub use crate::config::SessionConfig;
pub use crate::consumer::{AckMode, Consumer, MessageListener};
pub use crate::destination::{Destination, DestinationKind};
pub use crate::error::{Result, SessionError};
pub use crate::failover::FailoverGuard;
pub use crate::producer::{OutboundMessage, Producer};
pub use crate::session::{ConsumerOptions, ProducerOptions, Session};
pub use crate::subscription::{RegisterOutcome, Subscription, SubscriptionCatalog};
