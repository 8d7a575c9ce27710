//! Fail-over is transparent to an established consumer (spec §8 scenario
//! 5): `resubscribe` re-issues the consumer's declare/bind/consume chain
//! without retrying on a nested fail-over (it runs unguarded, since the
//! connection already holds the fail-over mutex) and the consumer comes
//! back out the other side still registered and usable.

mod support;

use std::sync::Arc;

use amqp_wire::{ChannelId, Method};
use amqp_session::{AckMode, ConsumerOptions, Destination, Session, SessionConfig};

use support::{FakeProtocolHandler, NullFailoverMutex};

#[test]
fn resubscribe_reissues_basic_consume_for_every_live_consumer() {
    let handler = Arc::new(FakeProtocolHandler::new());
    let config = SessionConfig { immediate_prefetch: true, ..Default::default() };
    let session = Session::new(
        1 as ChannelId,
        false,
        AckMode::Auto,
        config,
        Arc::clone(&handler) as Arc<dyn amqp_wire::ProtocolHandler>,
        Arc::new(NullFailoverMutex),
        Box::new(|_| {}),
    );

    let consumer = session
        .create_consumer(Destination::queue("orders"), ConsumerOptions::default())
        .expect("create_consumer");
    let tag = consumer.tag().to_owned();

    let consumes_before = count_basic_consume(&handler, &tag);
    assert_eq!(consumes_before, 1);

    session.resubscribe().expect("resubscribe");

    let consumes_after = count_basic_consume(&handler, &tag);
    assert_eq!(consumes_after, 2, "resubscribe must re-issue basic.consume for the same tag");

    assert!(!consumer.is_closed());
    assert!(session.is_destination_in_use(&Destination::queue("orders")));

    session.close().expect("close");
}

fn count_basic_consume(handler: &FakeProtocolHandler, tag: &str) -> usize {
    handler
        .writes_snapshot()
        .into_iter()
        .filter(|m| matches!(m, Method::BasicConsume { consumer_tag, .. } if consumer_tag == tag))
        .count()
}
