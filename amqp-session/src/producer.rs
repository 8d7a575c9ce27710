use std::sync::Arc;

use amqp_wire::{ChannelId, Method, MessageProperties, ProtocolHandler, WireError};
use bytes::Bytes;

use crate::destination::Destination;

/// An outbound message, assembled by the caller before `Producer::send`.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Bytes,
}

/// A message producer bound to one destination (spec's C9). Publishing is
/// a one-way `basic.publish`; there is no reply to wait on and so no
/// fail-over guarding, only the write itself.
pub struct Producer {
    id: u64,
    destination: Destination,
    /// Exchange resolved during provisioning: `""` (default exchange) for
    /// a queue destination, the topic exchange's name for a topic one.
    exchange: String,
    /// Routing key used when the caller doesn't supply one: the queue
    /// name for a queue destination, the topic name for a topic one.
    default_routing_key: String,
    mandatory: bool,
    immediate: bool,
    wait_until_sent: bool,
    transactional: bool,
    handler: Arc<dyn ProtocolHandler>,
    channel: ChannelId,
}

impl Producer {
    pub fn new(
        id: u64,
        destination: Destination,
        exchange: String,
        default_routing_key: String,
        mandatory: bool,
        immediate: bool,
        wait_until_sent: bool,
        transactional: bool,
        handler: Arc<dyn ProtocolHandler>,
        channel: ChannelId,
    ) -> Self {
        Producer {
            id,
            destination,
            exchange,
            default_routing_key,
            mandatory,
            immediate,
            wait_until_sent,
            transactional,
            handler,
            channel,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn immediate(&self) -> bool {
        self.immediate
    }

    pub fn wait_until_sent(&self) -> bool {
        self.wait_until_sent
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn send(&self, message: OutboundMessage) -> Result<(), WireError> {
        let routing_key = if message.routing_key.is_empty() {
            self.default_routing_key.clone()
        } else {
            message.routing_key
        };

        self.handler.write_frame(
            self.channel,
            Method::BasicPublish {
                exchange: self.exchange.clone(),
                routing_key,
                mandatory: self.mandatory,
                immediate: self.immediate,
                properties: message.properties,
                body: message.body,
            },
        )
    }
}
