use bytes::Bytes;

use crate::frame::MessageProperties;

pub type DeliveryTag = u64;
pub type ConsumerTag = String;

/// A real inbound message, as decoded by the codec on the network thread.
#[derive(Debug, Clone)]
pub struct Message {
    pub consumer_tag: ConsumerTag,
    pub delivery_tag: DeliveryTag,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Bytes,
}

/// A server "return" of an unroutable mandatory/immediate publish.
#[derive(Debug, Clone)]
pub struct Bounce {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Bytes,
}

/// Either a real delivery or a bounce; never both (spec §3).
#[derive(Debug, Clone)]
pub enum Delivery {
    Message(Message),
    Bounce(Bounce),
}

impl Delivery {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Delivery::Message(m) => Some(m),
            Delivery::Bounce(_) => None,
        }
    }

    pub fn consumer_tag(&self) -> Option<&str> {
        match self {
            Delivery::Message(m) => Some(&m.consumer_tag),
            Delivery::Bounce(_) => None,
        }
    }
}
