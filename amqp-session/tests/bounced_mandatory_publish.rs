//! A mandatory publish that the broker cannot route bounces back to the
//! application with its original payload intact (spec §8 scenario 4: "the
//! connection error callback receives a no-route error carrying the
//! original payload").

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use amqp_wire::{Bounce, ChannelId, Delivery};
use amqp_session::{AckMode, BounceError, BounceKind, SessionConfig};
use amqp_session::Session;
use bytes::Bytes;
use parking_lot::Mutex;

use support::{FakeProtocolHandler, NullFailoverMutex};

#[test]
fn a_bounced_mandatory_publish_carries_its_payload_to_the_error_sink() {
    let handler = Arc::new(FakeProtocolHandler::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);
    let seen: Arc<Mutex<Option<BounceError>>> = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);

    let session = Session::new(
        1 as ChannelId,
        false,
        AckMode::Auto,
        SessionConfig::default(),
        Arc::clone(&handler) as Arc<dyn amqp_wire::ProtocolHandler>,
        Arc::new(NullFailoverMutex),
        Box::new(move |err: BounceError| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            *seen_clone.lock() = Some(err);
        }),
    );

    session.message_received(Delivery::Bounce(Bounce {
        reply_code: 312,
        reply_text: "NO_ROUTE".into(),
        exchange: "orders".into(),
        routing_key: "orders.created".into(),
        properties: Default::default(),
        body: Bytes::from_static(b"order-42"),
    }));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let err = seen.lock().take().expect("bounce delivered");
    assert_eq!(err.kind, BounceKind::NoRoute);
    assert_eq!(&err.body[..], b"order-42");
    assert_eq!(err.exchange, "orders");

    session.close().expect("close");
}
