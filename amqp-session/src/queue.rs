use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use amqp_wire::Delivery;

/// Notified when the queue's occupancy crosses `high` going up, or `low`
/// going down. The session uses this to suspend/unsuspend the channel
/// without the network thread ever blocking on application code.
pub trait ThresholdListener: Send + Sync {
    fn above_high(&self);
    fn below_low(&self);
}

pub struct NoopThresholdListener;

impl ThresholdListener for NoopThresholdListener {
    fn above_high(&self) {}
    fn below_low(&self) {}
}

struct State {
    deliveries: VecDeque<Delivery>,
    closed: bool,
    above_high: bool,
}

/// The queue fed by the network thread and drained by the Dispatcher
/// (spec's C1). Capacity is advisory, not enforced here: `enqueue` never
/// blocks or drops, it only reports watermark crossings so the caller can
/// throttle the connection upstream.
pub struct InboundQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    high: usize,
    low: usize,
    listener: Arc<dyn ThresholdListener>,
}

impl InboundQueue {
    pub fn new(high: usize, low: usize, listener: Arc<dyn ThresholdListener>) -> Self {
        InboundQueue {
            state: Mutex::new(State {
                deliveries: VecDeque::new(),
                closed: false,
                above_high: false,
            }),
            not_empty: Condvar::new(),
            high,
            low,
            listener,
        }
    }

    pub fn enqueue(&self, delivery: Delivery) {
        let mut state = self.state.lock();
        state.deliveries.push_back(delivery);
        let crossed = !state.above_high && state.deliveries.len() > self.high;
        if crossed {
            state.above_high = true;
        }
        drop(state);

        self.not_empty.notify_one();
        if crossed {
            self.listener.above_high();
        }
    }

    /// Blocks until a delivery is ready or the queue is closed.
    pub fn dequeue(&self) -> Option<Delivery> {
        let mut state = self.state.lock();
        loop {
            if let Some(delivery) = state.deliveries.pop_front() {
                let crossed = state.above_high && state.deliveries.len() <= self.low;
                if crossed {
                    state.above_high = false;
                }
                drop(state);
                if crossed {
                    self.listener.below_low();
                }
                return Some(delivery);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every delivery matching `predicate`, preserving the
    /// relative order of what remains. Used by rollback/recover to elide
    /// in-flight deliveries and by consumer close to reject buffered ones.
    pub fn remove_matching<F>(&self, mut predicate: F) -> Vec<Delivery>
    where
        F: FnMut(&Delivery) -> bool,
    {
        let mut state = self.state.lock();
        let mut removed = Vec::new();
        let mut remaining = VecDeque::with_capacity(state.deliveries.len());
        for delivery in state.deliveries.drain(..) {
            if predicate(&delivery) {
                removed.push(delivery);
            } else {
                remaining.push_back(delivery);
            }
        }
        state.deliveries = remaining;
        let crossed = state.above_high && state.deliveries.len() <= self.low;
        if crossed {
            state.above_high = false;
        }
        drop(state);
        if crossed {
            self.listener.below_low();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqp_wire::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        highs: AtomicUsize,
        lows: AtomicUsize,
    }

    impl ThresholdListener for CountingListener {
        fn above_high(&self) {
            self.highs.fetch_add(1, Ordering::SeqCst);
        }
        fn below_low(&self) {
            self.lows.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn message(tag: u64) -> Delivery {
        Delivery::Message(Message {
            consumer_tag: "ctag".into(),
            delivery_tag: tag,
            redelivered: false,
            exchange: String::new(),
            routing_key: String::new(),
            properties: Default::default(),
            body: Default::default(),
        })
    }

    #[test]
    fn fires_above_high_exactly_once_per_crossing() {
        let listener = Arc::new(CountingListener { highs: AtomicUsize::new(0), lows: AtomicUsize::new(0) });
        let queue = InboundQueue::new(2, 1, listener.clone());

        queue.enqueue(message(1));
        queue.enqueue(message(2));
        queue.enqueue(message(3));
        queue.enqueue(message(4));

        assert_eq!(listener.highs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fires_below_low_once_occupancy_drops_to_the_watermark() {
        let listener = Arc::new(CountingListener { highs: AtomicUsize::new(0), lows: AtomicUsize::new(0) });
        let queue = InboundQueue::new(2, 1, listener.clone());

        for tag in 1..=3 {
            queue.enqueue(message(tag));
        }
        assert_eq!(listener.highs.load(Ordering::SeqCst), 1);

        queue.dequeue();
        assert_eq!(listener.lows.load(Ordering::SeqCst), 0);
        queue.dequeue();
        assert_eq!(listener.lows.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dequeue_returns_none_once_closed_and_drained() {
        let queue = InboundQueue::new(10, 5, Arc::new(NoopThresholdListener));
        queue.enqueue(message(1));
        queue.close();

        assert!(queue.dequeue().is_some());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn remove_matching_preserves_order_of_survivors() {
        let queue = InboundQueue::new(10, 5, Arc::new(NoopThresholdListener));
        for tag in 1..=5 {
            queue.enqueue(message(tag));
        }

        let removed = queue.remove_matching(|d| matches!(d, Delivery::Message(m) if m.delivery_tag <= 2));
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 3);
    }
}
