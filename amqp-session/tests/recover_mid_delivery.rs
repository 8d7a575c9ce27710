//! Recover while a delivery is already in the consumer's unacked log
//! (spec §8 scenario 3, "recover mid-onMessage"): the consumer's unacked
//! log is cleared and the `basic.recover` round-trip completes, without
//! needing the message to still be sitting in the inbound queue.

mod support;

use std::sync::Arc;
use std::time::Duration;

use amqp_wire::{ChannelId, Delivery, Message as WireMessage, Method};
use amqp_session::{AckMode, ConsumerOptions, Destination, Session, SessionConfig};

use support::{FakeProtocolHandler, NullFailoverMutex};

#[test]
fn recover_clears_the_consumers_unacked_log() {
    let handler = Arc::new(FakeProtocolHandler::new());
    let session = Session::new(
        1 as ChannelId,
        false,
        AckMode::Client,
        SessionConfig::default(),
        Arc::clone(&handler) as Arc<dyn amqp_wire::ProtocolHandler>,
        Arc::new(NullFailoverMutex),
        Box::new(|_| {}),
    );

    let consumer = session
        .create_consumer(Destination::queue("orders"), ConsumerOptions::default())
        .expect("create_consumer");

    // Simulate the message already having reached the application's
    // `onMessage` callback, unacknowledged, as if the dispatcher had
    // already handed it off.
    consumer.deliver(WireMessage {
        consumer_tag: consumer.tag().to_owned(),
        delivery_tag: 7,
        redelivered: false,
        exchange: String::new(),
        routing_key: "orders".into(),
        properties: Default::default(),
        body: "payload".into(),
    });
    assert_eq!(consumer.unacked_count(), 1);

    session.recover().expect("recover");

    assert_eq!(consumer.unacked_count(), 0, "recover must clear the unacked log");

    let recovered = handler.writes_snapshot().into_iter().any(|m| matches!(m, Method::BasicRecover { requeue: false }));
    assert!(recovered, "expected a basic.recover(requeue=false) round-trip");

    session.close().expect("close");
}

/// A listener that calls `recover()` on its own session, from the
/// dispatcher thread that is mid-delivery to it, must not have that same
/// delivery auto-acked afterwards (spec §8 scenario 3 under
/// `AckMode::Auto`): `recover()` already reclaimed the tag before
/// `on_message` returns.
#[test]
fn auto_ack_skips_a_delivery_whose_listener_recovers_the_session() {
    let handler = Arc::new(FakeProtocolHandler::new());
    let session = Session::new(
        2 as ChannelId,
        false,
        AckMode::Auto,
        SessionConfig { immediate_prefetch: true, ..SessionConfig::default() },
        Arc::clone(&handler) as Arc<dyn amqp_wire::ProtocolHandler>,
        Arc::new(NullFailoverMutex),
        Box::new(|_| {}),
    );

    let consumer = session
        .create_consumer(Destination::queue("orders"), ConsumerOptions::default())
        .expect("create_consumer");

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let recovering_session = session.clone();
    consumer.set_message_listener(Arc::new(move |_msg: WireMessage| {
        recovering_session.recover().expect("reentrant recover");
        let _ = done_tx.send(());
    }));

    session.message_received(Delivery::Message(WireMessage {
        consumer_tag: consumer.tag().to_owned(),
        delivery_tag: 1,
        redelivered: false,
        exchange: String::new(),
        routing_key: "orders".into(),
        properties: Default::default(),
        body: "payload".into(),
    }));

    done_rx.recv_timeout(Duration::from_secs(2)).expect("listener to run");
    // `flush_auto_ack` runs immediately after the listener returns, still
    // on the dispatcher thread; give it a moment to finish before checking.
    std::thread::sleep(Duration::from_millis(50));

    let acked = handler.writes_snapshot().into_iter().any(|m| matches!(m, Method::BasicAck { delivery_tag: 1, .. }));
    assert!(!acked, "auto-ack must not fire for a delivery recover() already reclaimed");

    session.close().expect("close");
}
