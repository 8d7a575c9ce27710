use std::collections::BTreeMap;

use bytes::Bytes;

/// A channel id, unique within the owning connection. The session core
/// treats this as an opaque handle; the wire layer is the only thing that
/// needs to put it on an actual frame header.
pub type ChannelId = u16;

/// A minimal AMQP field-table value. The wire codec that would actually
/// encode/decode these is out of scope here (see spec §1); this is just
/// the value shape `bindQueue`'s `arguments` and message headers need to
/// carry across the `ProtocolHandler` seam.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    LongString(String),
    Array(Vec<FieldValue>),
    Void,
}

pub type FieldTable = BTreeMap<String, FieldValue>;

/// Content-header properties carried alongside a published or delivered
/// message body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: FieldTable,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub app_id: Option<String>,
}

/// The outbound half of every frame class §6 lists. Variants that have no
/// reply (`basic.ack`, `basic.reject`) are written fire-and-forget via
/// `ProtocolHandler::write_frame`; the rest go through `sync_write` paired
/// with the `ReplyClass` they expect.
#[derive(Debug, Clone)]
pub enum Method {
    ExchangeDeclare {
        exchange: String,
        kind: String,
        nowait: bool,
    },
    QueueDeclare {
        queue: String,
        nowait: bool,
    },
    QueueBind {
        queue: String,
        routing_key: String,
        exchange: String,
        arguments: FieldTable,
        nowait: bool,
    },
    QueueDelete {
        queue: String,
        nowait: bool,
    },
    ExchangeBound {
        exchange: String,
        queue: String,
        routing_key: Option<String>,
    },
    BasicConsume {
        queue: String,
        consumer_tag: String,
        no_local: bool,
        no_ack: bool,
        exclusive: bool,
        nowait: bool,
        arguments: FieldTable,
    },
    BasicCancel {
        consumer_tag: String,
        nowait: bool,
    },
    BasicAck {
        delivery_tag: u64,
        multiple: bool,
    },
    BasicReject {
        delivery_tag: u64,
        requeue: bool,
    },
    BasicRecover {
        requeue: bool,
    },
    BasicPublish {
        exchange: String,
        routing_key: String,
        mandatory: bool,
        immediate: bool,
        properties: MessageProperties,
        body: Bytes,
    },
    TxSelect,
    TxCommit,
    TxRollback,
    ChannelFlow {
        active: bool,
    },
    ChannelClose {
        reply_code: u16,
        reply_text: String,
    },
}

/// Names the reply class a `sync_write` is waiting for, independent of the
/// reply's payload. Used both to issue the round-trip and to validate
/// whatever comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    ExchangeDeclareOk,
    QueueDeclareOk,
    QueueBindOk,
    QueueDeleteOk,
    ExchangeBoundOk,
    BasicConsumeOk,
    BasicRecoverOk,
    TxSelectOk,
    TxCommitOk,
    TxRollbackOk,
    ChannelFlowOk,
    ChannelCloseOk,
}

/// The inbound half of a round-trip.
#[derive(Debug, Clone)]
pub enum Reply {
    ExchangeDeclareOk,
    QueueDeclareOk {
        queue: String,
        message_count: u32,
        consumer_count: u32,
    },
    QueueBindOk,
    QueueDeleteOk {
        message_count: u32,
    },
    ExchangeBoundOk {
        reply_code: u16,
        reply_text: String,
    },
    BasicConsumeOk {
        consumer_tag: String,
    },
    BasicRecoverOk,
    TxSelectOk,
    TxCommitOk,
    TxRollbackOk,
    ChannelFlowOk {
        active: bool,
    },
    ChannelCloseOk,
}

impl Reply {
    pub fn class(&self) -> ReplyClass {
        match self {
            Reply::ExchangeDeclareOk => ReplyClass::ExchangeDeclareOk,
            Reply::QueueDeclareOk { .. } => ReplyClass::QueueDeclareOk,
            Reply::QueueBindOk => ReplyClass::QueueBindOk,
            Reply::QueueDeleteOk { .. } => ReplyClass::QueueDeleteOk,
            Reply::ExchangeBoundOk { .. } => ReplyClass::ExchangeBoundOk,
            Reply::BasicConsumeOk { .. } => ReplyClass::BasicConsumeOk,
            Reply::BasicRecoverOk => ReplyClass::BasicRecoverOk,
            Reply::TxSelectOk => ReplyClass::TxSelectOk,
            Reply::TxCommitOk => ReplyClass::TxCommitOk,
            Reply::TxRollbackOk => ReplyClass::TxRollbackOk,
            Reply::ChannelFlowOk { .. } => ReplyClass::ChannelFlowOk,
            Reply::ChannelCloseOk => ReplyClass::ChannelCloseOk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_class_matches_the_reply_it_was_built_from() {
        assert_eq!(
            Reply::QueueDeclareOk {
                queue: "q".into(),
                message_count: 0,
                consumer_count: 0,
            }
            .class(),
            ReplyClass::QueueDeclareOk
        );
        assert_eq!(Reply::TxCommitOk.class(), ReplyClass::TxCommitOk);
        assert_eq!(
            Reply::ChannelFlowOk { active: false }.class(),
            ReplyClass::ChannelFlowOk
        );
    }
}
