//! Happy-path consume/ack (spec §8 scenario 1): a message delivered over
//! the wire reaches the consumer's synchronous `receive`, and
//! acknowledging it sends exactly one `basic.ack` downward.

mod support;

use std::sync::Arc;
use std::time::Duration;

use amqp_wire::{ChannelId, Delivery, Message as WireMessage, Method};
use amqp_session::{AckMode, ConsumerOptions, Destination, Session, SessionConfig};

use support::{FakeProtocolHandler, NullFailoverMutex};

fn open_session(handler: Arc<FakeProtocolHandler>, config: SessionConfig, ack_mode: AckMode) -> Session {
    Session::new(
        1 as ChannelId,
        false,
        ack_mode,
        config,
        handler,
        Arc::new(NullFailoverMutex),
        Box::new(|_| {}),
    )
}

#[test]
fn delivered_message_is_received_and_ack_reaches_the_wire() {
    let handler = Arc::new(FakeProtocolHandler::new());
    let config = SessionConfig { immediate_prefetch: true, ..Default::default() };
    let session = open_session(Arc::clone(&handler), config, AckMode::Client);

    let consumer = session
        .create_consumer(Destination::queue("orders"), ConsumerOptions::default())
        .expect("create_consumer");

    session.message_received(Delivery::Message(WireMessage {
        consumer_tag: consumer.tag().to_owned(),
        delivery_tag: 1,
        redelivered: false,
        exchange: String::new(),
        routing_key: "orders".into(),
        properties: Default::default(),
        body: "payload".into(),
    }));

    let received = consumer.receive(Some(Duration::from_secs(1))).expect("message delivered");
    assert_eq!(received.delivery_tag, 1);

    session.acknowledge(&consumer, received.delivery_tag, false).expect("acknowledge");

    let acked = handler
        .writes_snapshot()
        .into_iter()
        .any(|m| matches!(m, Method::BasicAck { delivery_tag: 1, multiple: false }));
    assert!(acked, "expected a basic.ack for delivery tag 1");

    session.close().expect("close");
}

#[test]
fn acknowledge_all_flushes_every_client_ack_consumer() {
    let handler = Arc::new(FakeProtocolHandler::new());
    let config = SessionConfig { immediate_prefetch: true, ..Default::default() };
    let session = open_session(Arc::clone(&handler), config, AckMode::Client);

    let consumer = session
        .create_consumer(Destination::queue("orders"), ConsumerOptions::default())
        .expect("create_consumer");

    session.message_received(Delivery::Message(WireMessage {
        consumer_tag: consumer.tag().to_owned(),
        delivery_tag: 5,
        redelivered: false,
        exchange: String::new(),
        routing_key: "orders".into(),
        properties: Default::default(),
        body: "payload".into(),
    }));
    consumer.receive(Some(Duration::from_secs(1))).expect("message delivered");

    session.acknowledge_all().expect("acknowledge_all");

    let acked = handler
        .writes_snapshot()
        .into_iter()
        .any(|m| matches!(m, Method::BasicAck { delivery_tag: 5, multiple: true }));
    assert!(acked, "expected a multiple basic.ack covering tag 5");

    session.close().expect("close");
}
