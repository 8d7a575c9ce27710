//! Wire-level contracts consumed by the session core: frame/method value
//! types, the downward `ProtocolHandler` interface, and the errors that can
//! cross that seam. No codec and no transport live here — see spec §1.

mod delivery;
mod error;
mod frame;
mod protocol;

pub use crate::delivery::{Bounce, ConsumerTag, Delivery, DeliveryTag, Message};
pub use crate::error::WireError;
pub use crate::frame::{ChannelId, FieldTable, FieldValue, MessageProperties, Method, Reply, ReplyClass};
pub use crate::protocol::{FailoverMutex, ProtocolHandler};
