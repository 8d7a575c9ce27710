use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use amqp_wire::{DeliveryTag, Message as WireMessage};

use crate::destination::Destination;

/// The acknowledgement discipline a consumer was created under, inherited
/// from its owning session at creation time and fixed for the consumer's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    DuplicatesOk,
    NoAck,
    Transacted,
}

/// Callback invoked from a connection work thread, never from the network
/// thread (spec §4.6).
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: WireMessage);
}

impl<F> MessageListener for F
where
    F: Fn(WireMessage) + Send + Sync,
{
    fn on_message(&self, message: WireMessage) {
        self(message)
    }
}

struct SyncReceiveQueue {
    items: Mutex<VecDeque<WireMessage>>,
    available: Condvar,
}

impl SyncReceiveQueue {
    fn new() -> Self {
        SyncReceiveQueue {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn push(&self, message: WireMessage) {
        self.items.lock().push_back(message);
        self.available.notify_one();
    }

    fn pop(&self, timeout: Option<Duration>) -> Option<WireMessage> {
        let mut items = self.items.lock();
        if let Some(message) = items.pop_front() {
            return Some(message);
        }
        match timeout {
            Some(duration) => {
                let result = self.available.wait_for(&mut items, duration);
                if result.timed_out() {
                    None
                } else {
                    items.pop_front()
                }
            }
            None => {
                self.available.wait(&mut items);
                items.pop_front()
            }
        }
    }

    fn clear(&self) -> Vec<WireMessage> {
        self.items.lock().drain(..).collect()
    }

    fn wake(&self) {
        self.available.notify_all();
    }
}

/// A single subscription: the application-visible half of a consumer tag
/// (spec's C8). Holds either an installed listener or a buffer for
/// synchronous `receive`, never both at once in practice, plus the local
/// record of what has been delivered but not yet acknowledged.
pub struct Consumer {
    tag: String,
    destination: Destination,
    selector: Option<String>,
    exclusive: bool,
    no_local: bool,
    ack_mode: AckMode,
    prefetch_high: u32,
    prefetch_low: u32,
    auto_close: bool,
    no_consume: bool,
    durable_queue_name: Option<String>,
    listener: Mutex<Option<Arc<dyn MessageListener>>>,
    sync_queue: SyncReceiveQueue,
    unacked: Mutex<BTreeMap<DeliveryTag, WireMessage>>,
    closed: AtomicBool,
    highest_delivered: AtomicU64,
    auto_ack_sink: Option<Arc<dyn Fn(DeliveryTag) + Send + Sync>>,
}

#[allow(clippy::too_many_arguments)]
impl Consumer {
    pub fn new(
        tag: String,
        destination: Destination,
        selector: Option<String>,
        exclusive: bool,
        no_local: bool,
        ack_mode: AckMode,
        prefetch_high: u32,
        prefetch_low: u32,
        auto_close: bool,
        no_consume: bool,
        durable_queue_name: Option<String>,
        auto_ack_sink: Option<Arc<dyn Fn(DeliveryTag) + Send + Sync>>,
    ) -> Self {
        Consumer {
            tag,
            destination,
            selector,
            exclusive,
            no_local,
            ack_mode,
            prefetch_high,
            prefetch_low,
            auto_close,
            no_consume,
            durable_queue_name,
            listener: Mutex::new(None),
            sync_queue: SyncReceiveQueue::new(),
            unacked: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            highest_delivered: AtomicU64::new(0),
            auto_ack_sink,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn durable_queue_name(&self) -> Option<&str> {
        self.durable_queue_name.as_deref()
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn no_local(&self) -> bool {
        self.no_local
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn prefetch_high(&self) -> u32 {
        self.prefetch_high
    }

    pub fn prefetch_low(&self) -> u32 {
        self.prefetch_low
    }

    pub fn no_consume(&self) -> bool {
        self.no_consume
    }

    pub fn is_auto_close(&self) -> bool {
        self.auto_close
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_message_listener(&self, listener: Arc<dyn MessageListener>) {
        *self.listener.lock() = Some(listener);
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Called by the Dispatcher under the session's message delivery lock.
    /// Returns `false` if the consumer was closed out from under the
    /// delivery; the caller is responsible for rejecting/requeueing.
    pub fn deliver(&self, message: WireMessage) -> bool {
        if self.is_closed() {
            return false;
        }

        self.highest_delivered.fetch_max(message.delivery_tag, Ordering::SeqCst);

        if self.ack_mode != AckMode::NoAck && !self.no_consume {
            self.unacked.lock().insert(message.delivery_tag, message.clone());
        }

        let listener = self.listener.lock().clone();
        match listener {
            Some(listener) => {
                let tag = message.delivery_tag;
                listener.on_message(message);
                if self.ack_mode == AckMode::Auto {
                    self.flush_auto_ack(tag);
                }
            }
            None => self.sync_queue.push(message),
        }
        true
    }

    pub fn receive(&self, timeout: Option<Duration>) -> Option<WireMessage> {
        let message = self.sync_queue.pop(timeout)?;
        if self.ack_mode == AckMode::Auto {
            self.flush_auto_ack(message.delivery_tag);
        }
        Some(message)
    }

    /// `AckMode::Auto` acks the instant its listener/`receive` call
    /// returns. Guarded by the unacked log rather than a point-in-time
    /// flag: if `recover()`/`rollback()` raced this exact delivery (e.g. a
    /// listener calling `recover()` on itself) it already cleared the tag
    /// from `unacked` via `clear_unacked`, so the stale ack is skipped —
    /// the broker will redeliver the tag instead (spec §4.5, §8 scenario
    /// 3).
    fn flush_auto_ack(&self, tag: DeliveryTag) {
        if self.no_consume {
            return;
        }
        if self.unacked.lock().remove(&tag).is_none() {
            return;
        }
        if let Some(sink) = &self.auto_ack_sink {
            sink(tag);
        }
    }

    /// Messages already dequeued by the Dispatcher but never picked up by
    /// `receive`, flushed back to the broker with reject/requeue when the
    /// consumer auto-closes.
    pub fn drain_undelivered(&self) -> Vec<WireMessage> {
        self.sync_queue.clear()
    }

    pub fn highest_delivered(&self) -> Option<DeliveryTag> {
        match self.highest_delivered.load(Ordering::SeqCst) {
            0 => None,
            tag => Some(tag),
        }
    }

    pub fn acknowledge(&self, delivery_tag: DeliveryTag, multiple: bool) {
        let mut unacked = self.unacked.lock();
        if multiple {
            let stale: Vec<DeliveryTag> = unacked.range(..=delivery_tag).map(|(tag, _)| *tag).collect();
            for tag in stale {
                unacked.remove(&tag);
            }
        } else {
            unacked.remove(&delivery_tag);
        }
    }

    /// Discards the local unacknowledged-delivery log. Used by both
    /// `recover` and `rollback`: the broker is the sole source of
    /// redelivery afterwards, so stale local copies are dropped rather
    /// than replayed to the application.
    pub fn clear_unacked(&self) {
        self.unacked.lock().clear();
    }

    pub fn unacked_count(&self) -> usize {
        self.unacked.lock().len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sync_queue.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer() -> Consumer {
        Consumer::new(
            "ctag-1".into(),
            Destination::queue("orders"),
            None,
            false,
            false,
            AckMode::Client,
            100,
            50,
            false,
            false,
            None,
            None,
        )
    }

    fn message(tag: u64) -> WireMessage {
        WireMessage {
            consumer_tag: "ctag-1".into(),
            delivery_tag: tag,
            redelivered: false,
            exchange: String::new(),
            routing_key: "orders".into(),
            properties: Default::default(),
            body: Default::default(),
        }
    }

    #[test]
    fn deliver_buffers_for_synchronous_receive_without_a_listener() {
        let consumer = consumer();
        assert!(consumer.deliver(message(1)));
        let received = consumer.receive(None).expect("message");
        assert_eq!(received.delivery_tag, 1);
    }

    #[test]
    fn closed_consumer_refuses_delivery() {
        let consumer = consumer();
        consumer.close();
        assert!(!consumer.deliver(message(1)));
    }

    #[test]
    fn multiple_ack_flushes_everything_up_to_the_tag() {
        let consumer = consumer();
        for tag in 1..=3 {
            consumer.deliver(message(tag));
        }
        assert_eq!(consumer.unacked_count(), 3);
        consumer.acknowledge(2, true);
        assert_eq!(consumer.unacked_count(), 1);
    }

    #[test]
    fn no_ack_mode_never_tracks_unacked_deliveries() {
        let consumer = Consumer::new(
            "ctag-2".into(),
            Destination::queue("orders"),
            None,
            false,
            false,
            AckMode::NoAck,
            100,
            50,
            false,
            false,
            None,
            None,
        );
        consumer.deliver(message(1));
        assert_eq!(consumer.unacked_count(), 0);
    }

    #[test]
    fn clear_unacked_drops_the_whole_log() {
        let consumer = consumer();
        consumer.deliver(message(1));
        consumer.deliver(message(2));
        consumer.clear_unacked();
        assert_eq!(consumer.unacked_count(), 0);
    }

    #[test]
    fn auto_ack_flushes_once_a_listener_returns() {
        let acked = Arc::new(Mutex::new(Vec::new()));
        let acked_clone = Arc::clone(&acked);
        let consumer = Consumer::new(
            "ctag-3".into(),
            Destination::queue("orders"),
            None,
            false,
            false,
            AckMode::Auto,
            100,
            50,
            false,
            false,
            None,
            Some(Arc::new(move |tag: DeliveryTag| acked_clone.lock().push(tag))),
        );
        consumer.set_message_listener(Arc::new(|_msg: WireMessage| {}));

        consumer.deliver(message(1));

        assert_eq!(*acked.lock(), vec![1]);
        assert_eq!(consumer.unacked_count(), 0);
    }

    #[test]
    fn auto_ack_is_skipped_when_recovery_already_cleared_the_tag() {
        let acked = Arc::new(Mutex::new(Vec::new()));
        let acked_clone = Arc::clone(&acked);
        let consumer = Arc::new(Consumer::new(
            "ctag-4".into(),
            Destination::queue("orders"),
            None,
            false,
            false,
            AckMode::Auto,
            100,
            50,
            false,
            false,
            None,
            Some(Arc::new(move |tag: DeliveryTag| acked_clone.lock().push(tag))),
        ));

        let recovering = Arc::clone(&consumer);
        consumer.set_message_listener(Arc::new(move |_msg: WireMessage| {
            // A listener calling `recover()` on itself clears the unacked
            // log before returning control here, the same way
            // `Dispatcher::rollback` does mid-delivery.
            recovering.clear_unacked();
        }));

        consumer.deliver(message(7));

        assert!(acked.lock().is_empty(), "tag 7 must not be auto-acked once recover() cleared it");
        assert_eq!(consumer.unacked_count(), 0);
    }
}
