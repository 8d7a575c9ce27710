use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, ReentrantMutex};

use amqp_wire::{ChannelId, Delivery, DeliveryTag, Method, ProtocolHandler};

use crate::consumer::Consumer;
use crate::queue::InboundQueue;
use crate::registry::ConsumerRegistry;

struct Inner {
    stopped: bool,
    closed: bool,
}

/// One cooperative delivery loop per session, created lazily on the
/// first `createConsumer` call and torn down with the session (spec
/// C6). Owns the rollback high-water mark and the session's message
/// delivery lock is taken here for every hand-off to a `Consumer`.
pub struct Dispatcher {
    inner: Mutex<Inner>,
    condvar: Condvar,
    rollback_mark: AtomicU64,
    queue: Arc<InboundQueue>,
    consumers: Arc<ConsumerRegistry>,
    delivery_lock: Arc<ReentrantMutex<()>>,
    handler: Arc<dyn ProtocolHandler>,
    channel: ChannelId,
    session_closing: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn spawn(
        queue: Arc<InboundQueue>,
        consumers: Arc<ConsumerRegistry>,
        delivery_lock: Arc<ReentrantMutex<()>>,
        handler: Arc<dyn ProtocolHandler>,
        channel: ChannelId,
        session_closing: Arc<AtomicBool>,
        start_stopped: bool,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Dispatcher {
            inner: Mutex::new(Inner { stopped: start_stopped, closed: false }),
            condvar: Condvar::new(),
            rollback_mark: AtomicU64::new(0),
            queue,
            consumers,
            delivery_lock,
            handler,
            channel,
            session_closing,
            thread: Mutex::new(None),
        });

        let worker = Arc::clone(&dispatcher);
        let handle = thread::Builder::new()
            .name(format!("amqp-dispatcher-ch{}", channel))
            .spawn(move || worker.run())
            .expect("spawn dispatcher thread");
        *dispatcher.thread.lock() = Some(handle);

        dispatcher
    }

    fn run(&self) {
        loop {
            {
                let mut inner = self.inner.lock();
                while inner.stopped && !inner.closed {
                    self.condvar.wait(&mut inner);
                }
                if inner.closed {
                    return;
                }
            }

            match self.queue.dequeue() {
                Some(delivery) => self.dispatch_one(delivery),
                None => return,
            }
        }
    }

    fn dispatch_one(&self, delivery: Delivery) {
        let message = match delivery {
            Delivery::Message(message) => message,
            Delivery::Bounce(_) => {
                warn!("a bounce reached the dispatcher; it should have been routed before enqueue");
                return;
            }
        };

        if message.delivery_tag <= self.rollback_mark.load(Ordering::SeqCst) {
            self.requeue(message.delivery_tag);
            return;
        }

        let consumer = self.consumers.get(&message.consumer_tag);
        let delivery_tag = message.delivery_tag;

        let _guard = self.delivery_lock.lock();
        let delivered = match &consumer {
            Some(consumer) => consumer.deliver(message),
            None => false,
        };
        drop(_guard);

        if !delivered {
            if self.session_closing.load(Ordering::SeqCst) {
                debug!("dropping delivery {} for an unknown/closed consumer during session close", delivery_tag);
            } else {
                self.requeue(delivery_tag);
            }
        }
    }

    fn requeue(&self, delivery_tag: DeliveryTag) {
        if let Err(err) = self.handler.write_frame(self.channel, Method::BasicReject { delivery_tag, requeue: true }) {
            warn!("failed to reject/requeue delivery {}: {}", delivery_tag, err);
        }
    }

    pub fn set_connection_stopped(&self, stopped: bool) {
        let mut inner = self.inner.lock();
        inner.stopped = stopped;
        drop(inner);
        self.condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
        }
        self.condvar.notify_all();
        self.queue.close();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn rollback_mark(&self) -> DeliveryTag {
        self.rollback_mark.load(Ordering::SeqCst)
    }

    /// Elides every buffered delivery at or below `mark` and asks each
    /// live consumer to discard its own stale unacked log. Shared by
    /// `Session::rollback` and `Session::recover`.
    pub fn rollback(&self, mark: DeliveryTag, consumers: &[Arc<Consumer>]) {
        let was_stopped = self.stop_dispatch_loop();
        let _delivery_guard = self.delivery_lock.lock();

        self.rollback_mark.store(mark, Ordering::SeqCst);

        let stale = self.queue.remove_matching(|delivery| matches!(delivery, Delivery::Message(m) if m.delivery_tag <= mark));
        for delivery in stale {
            if let Delivery::Message(message) = delivery {
                self.requeue(message.delivery_tag);
            }
        }

        for consumer in consumers {
            consumer.clear_unacked();
        }

        drop(_delivery_guard);
        self.restore_dispatch_loop(was_stopped);
    }

    /// Stops the dispatcher, rejects every delivery already buffered for
    /// one consumer, marks it closed, then restores the prior stop state.
    pub fn reject_pending(&self, consumer: &Consumer) {
        let was_stopped = self.stop_dispatch_loop();
        let _delivery_guard = self.delivery_lock.lock();

        let tag = consumer.tag().to_owned();
        let stale = self.queue.remove_matching(|delivery| delivery.consumer_tag() == Some(tag.as_str()));
        for delivery in stale {
            if let Delivery::Message(message) = delivery {
                self.requeue(message.delivery_tag);
            }
        }
        consumer.close();

        drop(_delivery_guard);
        self.restore_dispatch_loop(was_stopped);
    }

    fn stop_dispatch_loop(&self) -> bool {
        let mut inner = self.inner.lock();
        let was_stopped = inner.stopped;
        inner.stopped = true;
        was_stopped
    }

    fn restore_dispatch_loop(&self, was_stopped: bool) {
        let mut inner = self.inner.lock();
        inner.stopped = was_stopped;
        drop(inner);
        self.condvar.notify_all();
    }
}
