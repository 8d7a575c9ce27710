use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};

use amqp_wire::{
    ChannelId, Delivery, DeliveryTag, FieldTable, Method, ProtocolHandler, Reply, ReplyClass,
};

use crate::bounce::{BounceError, BounceRouter};
use crate::browser::Browser;
use crate::config::SessionConfig;
use crate::consumer::{AckMode, Consumer, MessageListener};
use crate::destination::{Destination, DestinationKind};
use crate::dispatcher::Dispatcher;
use crate::error::{Result, SessionError};
use crate::failover::FailoverGuard;
use crate::producer::{OutboundMessage, Producer};
use crate::queue::{InboundQueue, ThresholdListener};
use crate::registry::{ConsumerRegistry, ProducerRegistry};
use crate::subscription::SubscriptionCatalog;
use crate::worker::WorkerPool;

/// Options accepted by `Session::create_consumer`. Every field has a
/// sensible default so callers only spell out what they deviate on.
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub prefetch_high: Option<u32>,
    pub prefetch_low: Option<u32>,
    pub no_local: bool,
    pub exclusive: bool,
    pub selector: Option<String>,
    pub no_consume: bool,
    pub auto_close: bool,
}

/// Options accepted by `Session::create_producer`.
#[derive(Debug, Clone, Default)]
pub struct ProducerOptions {
    pub mandatory: bool,
    pub immediate: bool,
    pub wait_until_sent: bool,
}

struct ThresholdBridge {
    session: std::sync::Weak<SessionInner>,
}

impl ThresholdBridge {
    /// Hands the toggle off to the session's worker thread instead of
    /// running it inline on whichever thread crossed the watermark (the
    /// network I/O thread for `enqueue`, the Dispatcher thread for
    /// `dequeue`) — `SPEC_FULL.md` §9's re-architecture of the source's
    /// one-thread-per-crossing listener. The worker is a single FIFO
    /// queue, so two toggles submitted from either side are still run in
    /// submission order.
    fn dispatch(&self, op: fn(&Session)) {
        if let Some(inner) = self.session.upgrade() {
            inner.worker.submit(move || op(&Session { inner }));
        }
    }
}

impl ThresholdListener for ThresholdBridge {
    fn above_high(&self) {
        self.dispatch(Session::suspend_on_watermark);
    }

    fn below_low(&self) {
        self.dispatch(Session::unsuspend_on_watermark);
    }
}

/// The inner, `Arc`-shared state behind `Session`. Split out from `Session`
/// itself so the threshold listener (which needs to reach back into the
/// session from the network thread) can hold a `Weak` reference instead of
/// a cycle.
struct SessionInner {
    channel: ChannelId,
    config: SessionConfig,
    transactional: bool,
    ack_mode: AckMode,
    handler: Arc<dyn ProtocolHandler>,
    guard: FailoverGuard,
    consumers: Arc<ConsumerRegistry>,
    producers: Arc<ProducerRegistry>,
    subscriptions: SubscriptionCatalog,
    bounce_router: BounceRouter,
    queue: Arc<InboundQueue>,
    delivery_lock: Arc<ReentrantMutex<()>>,
    suspension_lock: Mutex<()>,
    dispatcher: Mutex<Option<Arc<Dispatcher>>>,
    temporary_destinations: Mutex<HashSet<String>>,
    highest_seen: AtomicU64,
    consumer_tag_seq: AtomicU64,
    producer_id_seq: AtomicU64,
    suspended: AtomicBool,
    application_suspended: AtomicBool,
    closed: AtomicBool,
    closing: Arc<AtomicBool>,
    /// Set for the duration of `recover()` (spec §4.5, §8 scenario 3).
    /// `Consumer::flush_auto_ack`'s own unacked-log check is what actually
    /// keeps a reentrant `recover()` call from auto-acking the message
    /// being handled; this flag is the literal, inspectable surface the
    /// spec names and is consulted by the auto-ack sink as a second,
    /// belt-and-suspenders guard against concurrent (not just reentrant)
    /// recovery.
    in_recovery: AtomicBool,
    worker: WorkerPool,
}

/// A single AMQP channel's worth of application-visible messaging state:
/// destinations, consumers, producers, transactions and flow control
/// (spec's C7, the session core). Cheap to clone; every clone shares the
/// same underlying channel.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: ChannelId,
        transactional: bool,
        ack_mode: AckMode,
        config: SessionConfig,
        handler: Arc<dyn ProtocolHandler>,
        failover_mutex: Arc<dyn amqp_wire::FailoverMutex>,
        bounce_sink: Box<dyn Fn(BounceError) + Send + Sync>,
    ) -> Session {
        let guard = FailoverGuard::new(failover_mutex, Arc::clone(&handler));

        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<SessionInner>| {
            let queue = Arc::new(InboundQueue::new(
                config.default_prefetch_high as usize,
                config.default_prefetch_low as usize,
                Arc::new(ThresholdBridge { session: weak.clone() }) as Arc<dyn ThresholdListener>,
            ));

            SessionInner {
                channel,
                config,
                transactional,
                ack_mode,
                handler,
                guard,
                consumers: Arc::new(ConsumerRegistry::new()),
                producers: Arc::new(ProducerRegistry::new()),
                subscriptions: SubscriptionCatalog::new(),
                bounce_router: BounceRouter::new(bounce_sink),
                queue,
                delivery_lock: Arc::new(ReentrantMutex::new(())),
                suspension_lock: Mutex::new(()),
                dispatcher: Mutex::new(None),
                temporary_destinations: Mutex::new(HashSet::new()),
                highest_seen: AtomicU64::new(0),
                consumer_tag_seq: AtomicU64::new(0),
                producer_id_seq: AtomicU64::new(0),
                suspended: AtomicBool::new(false),
                application_suspended: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                closing: Arc::new(AtomicBool::new(false)),
                in_recovery: AtomicBool::new(false),
                worker: WorkerPool::new(format!("amqp-worker-ch{}", channel)),
            }
        });

        Session { inner }
    }

    pub fn channel(&self) -> ChannelId {
        self.inner.channel
    }

    pub fn is_transactional(&self) -> bool {
        self.inner.transactional
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_transactional(&self) -> Result<()> {
        if !self.inner.transactional {
            Err(SessionError::NotTransacted)
        } else {
            Ok(())
        }
    }

    fn ensure_not_transactional(&self) -> Result<()> {
        if self.inner.transactional {
            Err(SessionError::IsTransacted)
        } else {
            Ok(())
        }
    }

    fn next_consumer_tag(&self) -> String {
        let id = self.inner.consumer_tag_seq.fetch_add(1, Ordering::SeqCst);
        format!("ctag-{}-{}", self.inner.channel, id)
    }

    fn next_producer_id(&self) -> u64 {
        self.inner.producer_id_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn owns_temporary(&self, name: &str) -> bool {
        self.inner.temporary_destinations.lock().contains(name)
    }

    // -- Destination declaration -------------------------------------------------

    pub fn declare_exchange(&self, name: &str, kind: &str, nowait: bool) -> Result<()> {
        self.ensure_open()?;
        let method = Method::ExchangeDeclare { exchange: name.to_owned(), kind: kind.to_owned(), nowait };
        if nowait {
            self.inner.guard.noop_write(self.inner.channel, method)
        } else {
            self.inner.guard.retrying(self.inner.channel, method, ReplyClass::ExchangeDeclareOk, None)?;
            Ok(())
        }
    }

    pub fn declare_queue(&self, destination: &Destination) -> Result<String> {
        self.ensure_open()?;
        if destination.is_temporary && !self.owns_temporary(&destination.name) && !destination.is_name_required {
            return Err(SessionError::InvalidDestination(format!(
                "temporary destination {} does not belong to this session",
                destination.name
            )));
        }

        let queue_name = if destination.is_name_required {
            self.inner.handler.generate_queue_name()
        } else {
            destination.name.clone()
        };

        let reply = self.inner.guard.retrying(
            self.inner.channel,
            Method::QueueDeclare { queue: queue_name.clone(), nowait: false },
            ReplyClass::QueueDeclareOk,
            None,
        )?;

        let resolved = match reply {
            Reply::QueueDeclareOk { queue, .. } => queue,
            _ => return Err(SessionError::ProtocolError("unexpected reply to queue.declare".into())),
        };

        if destination.is_temporary {
            self.inner.temporary_destinations.lock().insert(resolved.clone());
        }

        Ok(resolved)
    }

    pub fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str, arguments: FieldTable) -> Result<()> {
        self.ensure_open()?;
        if routing_key.is_empty() && !exchange.is_empty() {
            return Err(SessionError::InvalidRoutingKey("routing key must not be empty for a named exchange".into()));
        }
        self.inner.guard.retrying(
            self.inner.channel,
            Method::QueueBind {
                queue: queue.to_owned(),
                routing_key: routing_key.to_owned(),
                exchange: exchange.to_owned(),
                arguments,
                nowait: false,
            },
            ReplyClass::QueueBindOk,
            None,
        )?;
        Ok(())
    }

    pub fn delete_queue(&self, name: &str) -> Result<u32> {
        self.ensure_open()?;
        let reply = self.inner.guard.retrying(
            self.inner.channel,
            Method::QueueDelete { queue: name.to_owned(), nowait: false },
            ReplyClass::QueueDeleteOk,
            None,
        )?;
        self.inner.temporary_destinations.lock().remove(name);
        match reply {
            Reply::QueueDeleteOk { message_count } => Ok(message_count),
            _ => Err(SessionError::ProtocolError("unexpected reply to queue.delete".into())),
        }
    }

    pub fn is_queue_bound(&self, exchange: &str, queue: &str, routing_key: Option<&str>) -> Result<bool> {
        self.ensure_open()?;
        let reply = self.inner.guard.retrying(
            self.inner.channel,
            Method::ExchangeBound {
                exchange: exchange.to_owned(),
                queue: queue.to_owned(),
                routing_key: routing_key.map(str::to_owned),
            },
            ReplyClass::ExchangeBoundOk,
            None,
        )?;
        match reply {
            Reply::ExchangeBoundOk { reply_code, .. } => Ok(reply_code == 0),
            _ => Err(SessionError::ProtocolError("unexpected reply to exchange.bound".into())),
        }
    }

    pub fn is_destination_in_use(&self, destination: &Destination) -> bool {
        self.inner.consumers.has_consumer_for(&destination.name)
    }

    // -- Consumers ----------------------------------------------------------------

    pub fn create_consumer(&self, destination: Destination, options: ConsumerOptions) -> Result<Arc<Consumer>> {
        self.create_consumer_impl(destination, options, None)
    }

    pub fn create_durable_subscriber(
        &self,
        topic: &str,
        name: &str,
        selector: Option<String>,
        no_local: bool,
    ) -> Result<Arc<Consumer>> {
        self.ensure_open()?;
        if self.inner.config.strict_amqp {
            return Err(SessionError::InvalidDestination(format!(
                "durable subscribers are not available in strict mode: {}",
                name
            )));
        }

        let queue_name = format!("durable.{}", name);

        if let Some(existing) = self.inner.subscriptions.lookup(name) {
            if existing.topic == topic {
                return Err(SessionError::AlreadySubscribed(name.to_owned()));
            }
            self.unsubscribe(name)?;
        } else if !self.is_queue_bound("amq.topic", &queue_name, Some(topic)).unwrap_or(false) {
            // The durable queue may already exist, bound to a different
            // routing key than requested (a prior subscriber under this
            // name, from an earlier process). Delete it so
            // `provision_and_subscribe` declares and binds it fresh rather
            // than silently consuming from the stale binding.
            let _ = self.delete_queue(&queue_name);
        }

        let destination = Destination { kind: DestinationKind::Topic, name: topic.to_owned(), is_temporary: false, is_name_required: false };
        let options = ConsumerOptions { selector, no_local, ..Default::default() };
        let consumer = self.create_consumer_impl(destination, options, Some(queue_name))?;
        self.inner.subscriptions.register(name, consumer.tag().to_owned(), topic.to_owned());
        Ok(consumer)
    }

    /// A read-only view over a queue, disallowed entirely under strict
    /// mode (spec §6's `STRICT_AMQP`). Modeled as a consumer forced into
    /// `no_consume`, never acking what it reads.
    pub fn create_browser(&self, queue: &str, selector: Option<String>) -> Result<Browser> {
        self.ensure_open()?;
        if self.inner.config.strict_amqp {
            return Err(SessionError::InvalidDestination(format!(
                "browsers are not available in strict mode: {}",
                queue
            )));
        }

        let options = ConsumerOptions { selector, no_consume: true, ..Default::default() };
        let consumer = self.create_consumer_impl(Destination::queue(queue), options, None)?;
        Ok(Browser::new(consumer))
    }

    /// Builds the closure `Consumer::flush_auto_ack` calls for
    /// `AckMode::Auto`: a plain fire-and-forget `basic.ack`, skipped
    /// outright while `recover()` is running session-wide (not just the
    /// reentrant case `Consumer` itself already guards against via its
    /// unacked log). Holds a `Weak` back-reference so a consumer outliving
    /// its session doesn't keep `SessionInner` alive.
    fn auto_ack_sink(&self) -> Arc<dyn Fn(DeliveryTag) + Send + Sync> {
        let weak_inner = Arc::downgrade(&self.inner);
        Arc::new(move |tag: DeliveryTag| {
            if let Some(inner) = weak_inner.upgrade() {
                if inner.in_recovery.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(err) = inner.guard.noop_write(inner.channel, Method::BasicAck { delivery_tag: tag, multiple: false }) {
                    warn!("auto-ack for delivery {} failed: {}", tag, err);
                }
            }
        })
    }

    /// Tears down a durable subscription: closes its consumer (if still
    /// live) and deletes the backing queue.
    pub fn unsubscribe(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let subscription = self.inner.subscriptions.remove(name).ok_or_else(|| SessionError::UnknownSubscription(name.to_owned()))?;

        if let Some(consumer) = self.inner.consumers.deregister(&subscription.consumer_tag) {
            self.close_consumer_impl(&consumer)?;
        }

        let _ = self.delete_queue(&format!("durable.{}", name));
        Ok(())
    }

    fn create_consumer_impl(
        &self,
        destination: Destination,
        mut options: ConsumerOptions,
        durable_queue_name: Option<String>,
    ) -> Result<Arc<Consumer>> {
        self.ensure_open()?;

        if destination.is_temporary && !destination.is_name_required && !self.owns_temporary(&destination.name) {
            return Err(SessionError::InvalidDestination(format!(
                "temporary destination {} does not belong to this session",
                destination.name
            )));
        }

        if let Some(selector) = options.selector.as_deref() {
            validate_selector(selector)?;
        }
        if options.selector.is_some() && self.inner.config.strict_amqp {
            if self.inner.config.strict_amqp_fatal {
                return Err(SessionError::InvalidSelector("selectors are not available in strict mode".into()));
            }
            warn!("dropping selector {:?} under strict mode", options.selector);
            options.selector = None;
        }

        let tag = self.next_consumer_tag();
        let prefetch_high = options.prefetch_high.unwrap_or(self.inner.config.default_prefetch_high);
        let prefetch_low = options.prefetch_low.unwrap_or(self.inner.config.default_prefetch_low);

        let consumer = Arc::new(Consumer::new(
            tag.clone(),
            destination.clone(),
            options.selector.clone(),
            options.exclusive,
            options.no_local,
            self.inner.ack_mode,
            prefetch_high,
            prefetch_low,
            options.auto_close,
            options.no_consume,
            durable_queue_name.clone(),
            Some(self.auto_ack_sink()),
        ));

        self.inner.consumers.register(tag.clone(), Arc::clone(&consumer));

        if let Err(err) = self.provision_and_subscribe(&destination, &consumer, durable_queue_name, RoundTrip::Retry) {
            self.inner.consumers.deregister(&tag);
            return Err(err);
        }

        self.ensure_dispatcher();
        if !self.inner.config.immediate_prefetch {
            self.suspend_channel_for_new_consumer()?;
        }

        Ok(consumer)
    }

    fn provision_and_subscribe(
        &self,
        destination: &Destination,
        consumer: &Consumer,
        durable_queue_name: Option<String>,
        mode: RoundTrip,
    ) -> Result<()> {
        let queue_name = match destination.kind {
            DestinationKind::Queue => self.round_trip_queue_declare(destination, mode)?,
            DestinationKind::Topic => {
                let exchange_name = "amq.topic".to_owned();
                self.round_trip(
                    mode,
                    Method::ExchangeDeclare { exchange: exchange_name.clone(), kind: "topic".into(), nowait: false },
                    ReplyClass::ExchangeDeclareOk,
                )?;

                let queue_name = durable_queue_name.unwrap_or_else(|| self.inner.handler.generate_queue_name());
                self.round_trip(
                    mode,
                    Method::QueueDeclare { queue: queue_name.clone(), nowait: false },
                    ReplyClass::QueueDeclareOk,
                )?;
                self.round_trip(
                    mode,
                    Method::QueueBind {
                        queue: queue_name.clone(),
                        routing_key: destination.name.clone(),
                        exchange: exchange_name,
                        arguments: FieldTable::new(),
                        nowait: false,
                    },
                    ReplyClass::QueueBindOk,
                )?;
                queue_name
            }
        };

        self.round_trip(
            mode,
            Method::BasicConsume {
                queue: queue_name,
                consumer_tag: consumer.tag().to_owned(),
                no_local: consumer.no_local(),
                no_ack: consumer.ack_mode() == AckMode::NoAck,
                exclusive: consumer.exclusive(),
                nowait: false,
                arguments: FieldTable::new(),
            },
            ReplyClass::BasicConsumeOk,
        )?;

        Ok(())
    }

    fn round_trip_queue_declare(&self, destination: &Destination, mode: RoundTrip) -> Result<String> {
        let queue_name = if destination.is_name_required {
            self.inner.handler.generate_queue_name()
        } else {
            destination.name.clone()
        };
        self.round_trip(mode, Method::QueueDeclare { queue: queue_name.clone(), nowait: false }, ReplyClass::QueueDeclareOk)?;
        if destination.is_temporary {
            self.inner.temporary_destinations.lock().insert(queue_name.clone());
        }
        Ok(queue_name)
    }

    fn round_trip(&self, mode: RoundTrip, method: Method, expected: ReplyClass) -> Result<Reply> {
        match mode {
            RoundTrip::Retry => self.inner.guard.retrying(self.inner.channel, method, expected, None),
            RoundTrip::Unguarded => self
                .inner
                .guard
                .unguarded(self.inner.channel, method, expected, None)?
                .ok_or(SessionError::FailoverInterrupted { operation: "resubscribe" }),
        }
    }

    pub fn close_consumer(&self, consumer: &Arc<Consumer>) -> Result<()> {
        self.ensure_open()?;
        self.inner.consumers.deregister(consumer.tag());
        self.close_consumer_impl(consumer)
    }

    fn close_consumer_impl(&self, consumer: &Arc<Consumer>) -> Result<()> {
        if let Some(dispatcher) = self.inner.dispatcher.lock().as_ref() {
            dispatcher.reject_pending(consumer);
        } else {
            consumer.close();
        }

        for message in consumer.drain_undelivered() {
            let _ = self.inner.handler.write_frame(
                self.inner.channel,
                Method::BasicReject { delivery_tag: message.delivery_tag, requeue: true },
            );
        }

        self.inner.guard.noop_write(self.inner.channel, Method::BasicCancel { consumer_tag: consumer.tag().to_owned(), nowait: true })
    }

    /// Called by the Dispatcher/network layer when the broker cancels a
    /// consumer out from under the application (queue deleted, etc). Only
    /// an `auto_close` consumer is actually torn down here; a consumer
    /// created without it stays registered so the application notices the
    /// cancellation through its own channel (a dead `receive`/listener)
    /// rather than having its subscription silently disappear.
    pub fn confirm_consumer_cancelled(&self, consumer_tag: &str) {
        let consumer = match self.inner.consumers.get(consumer_tag) {
            Some(consumer) => consumer,
            None => return,
        };

        if !consumer.is_auto_close() {
            warn!("consumer {} was cancelled by the broker; not auto-close, leaving it registered", consumer_tag);
            return;
        }

        self.inner.consumers.deregister(consumer_tag);
        if let Some(dispatcher) = self.inner.dispatcher.lock().as_ref() {
            dispatcher.reject_pending(&consumer);
        }
        for message in consumer.drain_undelivered() {
            let _ = self.inner.handler.write_frame(
                self.inner.channel,
                Method::BasicReject { delivery_tag: message.delivery_tag, requeue: true },
            );
        }
        consumer.close();
    }

    /// Session-wide listener. Only meaningful when the session has
    /// exactly one live consumer; otherwise which consumer it should
    /// apply to is ambiguous and this returns an error rather than
    /// silently picking one.
    pub fn set_message_listener(&self, listener: Arc<dyn MessageListener>) -> Result<()> {
        let consumers = self.inner.consumers.snapshot_in_order();
        match consumers.as_slice() {
            [consumer] => {
                consumer.set_message_listener(listener);
                Ok(())
            }
            other => Err(SessionError::ProtocolError(format!(
                "set_message_listener requires exactly one consumer on this session, found {}",
                other.len()
            ))),
        }
    }

    // -- Producers ------------------------------------------------------------------

    pub fn create_producer(&self, destination: Destination, options: ProducerOptions) -> Result<Arc<Producer>> {
        self.ensure_open()?;

        if destination.is_temporary && !self.owns_temporary(&destination.name) {
            return Err(SessionError::InvalidDestination(format!(
                "temporary destination {} does not belong to this session",
                destination.name
            )));
        }

        let (exchange, default_routing_key) = match destination.kind {
            DestinationKind::Queue => {
                let queue_name = self.declare_queue(&destination)?;
                (String::new(), queue_name)
            }
            DestinationKind::Topic => {
                self.declare_exchange("amq.topic", "topic", false)?;
                ("amq.topic".to_owned(), destination.name.clone())
            }
        };

        let id = self.next_producer_id();
        let producer = Arc::new(Producer::new(
            id,
            destination,
            exchange,
            default_routing_key,
            options.mandatory,
            options.immediate,
            options.wait_until_sent,
            self.inner.transactional,
            Arc::clone(&self.inner.handler),
            self.inner.channel,
        ));
        self.inner.producers.register(Arc::clone(&producer));
        Ok(producer)
    }

    pub fn close_producer(&self, producer: &Producer) {
        self.inner.producers.deregister(producer.id());
    }

    pub fn send(&self, producer: &Producer, message: OutboundMessage) -> Result<()> {
        self.ensure_open()?;
        producer.send(message)?;
        Ok(())
    }

    // -- Acknowledgement, transactions, recovery -------------------------------------

    pub fn acknowledge(&self, consumer: &Consumer, delivery_tag: amqp_wire::DeliveryTag, multiple: bool) -> Result<()> {
        self.ensure_open()?;
        consumer.acknowledge(delivery_tag, multiple);
        self.inner.guard.noop_write(self.inner.channel, Method::BasicAck { delivery_tag, multiple })
    }

    /// Flushes a `multiple=true` ack for every live consumer in explicit
    /// `client` acknowledgement mode, covering its highest delivered tag.
    /// The per-consumer half of what `commit()` already does for the
    /// transactional case, generalized to explicit ack outside a
    /// transaction (spec.md §6 lists `acknowledge()` in the upward API
    /// without detailing it further; see `SPEC_FULL.md` §5).
    pub fn acknowledge_all(&self) -> Result<()> {
        self.ensure_open()?;
        for consumer in self.inner.consumers.snapshot_in_order() {
            if consumer.ack_mode() != AckMode::Client {
                continue;
            }
            if let Some(tag) = consumer.highest_delivered() {
                consumer.acknowledge(tag, true);
                self.inner.guard.noop_write(self.inner.channel, Method::BasicAck { delivery_tag: tag, multiple: true })?;
            }
        }
        Ok(())
    }

    /// Puts the channel into transactional mode server-side (spec §6's
    /// `tx.select -> tx.select-ok` frame class). Issued once by the
    /// `Connection` factory right after constructing a transactional
    /// session, before any other traffic crosses the channel.
    pub fn select_transacted(&self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_transactional()?;
        self.inner.guard.retrying(self.inner.channel, Method::TxSelect, ReplyClass::TxSelectOk, None)?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_transactional()?;

        for consumer in self.inner.consumers.snapshot_in_order() {
            if let Some(tag) = consumer.highest_delivered() {
                let _ = self.inner.guard.noop_write(self.inner.channel, Method::BasicAck { delivery_tag: tag, multiple: true });
            }
        }

        self.inner
            .guard
            .uncertain(self.inner.channel, Method::TxCommit, ReplyClass::TxCommitOk, None, "commit")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_transactional()?;

        let _suspension_guard = self.inner.suspension_lock.lock();
        let was_suspended = self.inner.suspended.load(Ordering::SeqCst);
        self.suspend_channel_locked()?;

        let mark = self.inner.highest_seen.load(Ordering::SeqCst);
        if let Some(dispatcher) = self.inner.dispatcher.lock().as_ref() {
            dispatcher.rollback(mark, &self.inner.consumers.snapshot_in_order());
        }

        let result = self.inner.guard.uncertain(self.inner.channel, Method::TxRollback, ReplyClass::TxRollbackOk, None, "rollback");

        if !was_suspended {
            let _ = self.resume_channel_locked();
        }

        result.map(|_| ())
    }

    /// Redelivers every unacknowledged message on this channel without
    /// requeueing first (spec §4.5: `basic.recover(requeue=false)`, not
    /// `true` — the broker redelivers in place rather than re-queueing and
    /// potentially handing the message to a different consumer). Under
    /// strict AMQP this is a fire-and-forget notification rather than a
    /// blocking round-trip, since strict brokers are not guaranteed to
    /// reply to it (spec §6's `STRICT_AMQP`).
    pub fn recover(&self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_not_transactional()?;

        let _recovery_guard = RecoveryScope::enter(&self.inner);

        let _suspension_guard = self.inner.suspension_lock.lock();
        let was_suspended = self.inner.suspended.load(Ordering::SeqCst);
        self.suspend_channel_locked()?;

        let mark = self.inner.highest_seen.load(Ordering::SeqCst);
        if let Some(dispatcher) = self.inner.dispatcher.lock().as_ref() {
            dispatcher.rollback(mark, &self.inner.consumers.snapshot_in_order());
        }

        let result = if self.inner.config.strict_amqp {
            warn!("recover() on channel {} sent as a fire-and-forget notification under strict AMQP", self.inner.channel);
            self.inner.guard.noop_write(self.inner.channel, Method::BasicRecover { requeue: false })
        } else {
            self.inner
                .guard
                .uncertain(self.inner.channel, Method::BasicRecover { requeue: false }, ReplyClass::BasicRecoverOk, None, "recover")
                .map(|_| ())
        };

        if !was_suspended {
            let _ = self.resume_channel_locked();
        }

        result
    }

    // -- Flow control -----------------------------------------------------------------

    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::SeqCst)
    }

    /// Application-initiated suspend/resume (spec's upward API). Composes
    /// with the internal watermark-driven suspension: the channel stays
    /// suspended while *either* source wants it suspended.
    pub fn set_application_suspended(&self, suspended: bool) -> Result<()> {
        self.ensure_open()?;
        let _suspension_guard = self.inner.suspension_lock.lock();
        self.inner.application_suspended.store(suspended, Ordering::SeqCst);
        self.recompute_suspension_locked()
    }

    fn suspend_on_watermark(&self) {
        let _suspension_guard = self.inner.suspension_lock.lock();
        if self.recompute_suspension_locked().is_err() {
            warn!("failed to suspend channel {} after crossing the high watermark", self.inner.channel);
        }
    }

    fn unsuspend_on_watermark(&self) {
        let _suspension_guard = self.inner.suspension_lock.lock();
        if self.recompute_suspension_locked().is_err() {
            warn!("failed to resume channel {} after dropping below the low watermark", self.inner.channel);
        }
    }

    fn suspend_channel_for_new_consumer(&self) -> Result<()> {
        let _suspension_guard = self.inner.suspension_lock.lock();
        self.inner.application_suspended.store(true, Ordering::SeqCst);
        self.recompute_suspension_locked()
    }

    fn suspend_channel_locked(&self) -> Result<()> {
        if self.inner.suspended.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.write_channel_flow(false)
    }

    fn resume_channel_locked(&self) -> Result<()> {
        if !self.inner.suspended.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.write_channel_flow(true)
    }

    fn recompute_suspension_locked(&self) -> Result<()> {
        let wants_suspended = self.inner.application_suspended.load(Ordering::SeqCst);
        if wants_suspended {
            self.suspend_channel_locked()
        } else {
            self.resume_channel_locked()
        }
    }

    fn write_channel_flow(&self, active: bool) -> Result<()> {
        self.inner.guard.retrying(self.inner.channel, Method::ChannelFlow { active }, ReplyClass::ChannelFlowOk, None)?;
        if let Some(dispatcher) = self.inner.dispatcher.lock().as_ref() {
            dispatcher.set_connection_stopped(!active);
        }
        Ok(())
    }

    // -- Delivery entry point, used by the connection's network thread --------------

    /// Hands a frame decoded off the wire to the session. Real deliveries
    /// bump the high-water mark and go onto the inbound queue; bounces go
    /// straight to the bounce router.
    pub fn message_received(&self, delivery: Delivery) {
        match delivery {
            Delivery::Message(message) => {
                self.inner.highest_seen.fetch_max(message.delivery_tag, Ordering::SeqCst);
                self.inner.queue.enqueue(Delivery::Message(message));
            }
            Delivery::Bounce(bounce) => {
                let inner = Arc::clone(&self.inner);
                let worker_inner = Arc::clone(&self.inner);
                worker_inner.worker.submit(move || inner.bounce_router.route(bounce));
            }
        }
    }

    fn ensure_dispatcher(&self) -> Arc<Dispatcher> {
        let mut dispatcher = self.inner.dispatcher.lock();
        if let Some(existing) = dispatcher.as_ref() {
            return Arc::clone(existing);
        }

        let spawned = Dispatcher::spawn(
            Arc::clone(&self.inner.queue),
            Arc::clone(&self.inner.consumers),
            Arc::clone(&self.inner.delivery_lock),
            Arc::clone(&self.inner.handler),
            self.inner.channel,
            Arc::clone(&self.inner.closing),
            self.inner.suspended.load(Ordering::SeqCst),
        );
        *dispatcher = Some(Arc::clone(&spawned));
        spawned
    }

    // -- Fail-over ----------------------------------------------------------------------

    /// Called by the owning connection while it holds the fail-over
    /// mutex, after re-establishing the transport. Rebuilds every
    /// consumer's subscription in creation order; producers carry no
    /// server-side state and survive unconditionally.
    pub fn resubscribe(&self) -> Result<()> {
        let consumers = self.inner.consumers.snapshot_in_order();
        self.inner.consumers.clear();

        for consumer in consumers {
            self.inner.consumers.register(consumer.tag().to_owned(), Arc::clone(&consumer));

            let outcome = self.provision_and_subscribe(
                consumer.destination(),
                &consumer,
                consumer.durable_queue_name().map(str::to_owned),
                RoundTrip::Unguarded,
            );

            if let Err(err) = outcome {
                warn!("failed to resubscribe consumer {}: {}", consumer.tag(), err);
                self.inner.consumers.deregister(consumer.tag());
            }
        }

        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.closing.store(true, Ordering::SeqCst);

        let _delivery_guard = self.inner.delivery_lock.lock();

        for producer in self.inner.producers.snapshot_in_order() {
            self.inner.producers.deregister(producer.id());
        }
        for consumer in self.inner.consumers.snapshot_in_order() {
            consumer.close();
        }
        self.inner.consumers.clear();

        let result = self.inner.guard.uncertain(
            self.inner.channel,
            Method::ChannelClose { reply_code: 200, reply_text: "goodbye".into() },
            ReplyClass::ChannelCloseOk,
            None,
            "close",
        );

        drop(_delivery_guard);

        if let Some(dispatcher) = self.inner.dispatcher.lock().take() {
            dispatcher.close();
        }
        self.inner.queue.close();
        self.inner.worker.close();

        let _ = self.inner.handler.close_session(self.inner.channel);

        result.map(|_| ())
    }
}

#[derive(Clone, Copy)]
enum RoundTrip {
    Retry,
    Unguarded,
}

/// Sets `SessionInner::in_recovery` for the duration of `recover()`,
/// cleared on every exit path including an early `?` return.
struct RecoveryScope<'a> {
    inner: &'a SessionInner,
}

impl<'a> RecoveryScope<'a> {
    fn enter(inner: &'a SessionInner) -> Self {
        inner.in_recovery.store(true, Ordering::SeqCst);
        RecoveryScope { inner }
    }
}

impl Drop for RecoveryScope<'_> {
    fn drop(&mut self) {
        self.inner.in_recovery.store(false, Ordering::SeqCst);
    }
}

/// Minimal syntactic validation of a JMS-style selector string: balanced
/// quotes and parentheses. Full SQL-92 selector evaluation is out of
/// scope (spec §1's non-goals); this only rejects obviously malformed
/// input early instead of deferring to an opaque broker error.
fn validate_selector(selector: &str) -> Result<()> {
    let mut paren_depth = 0i32;
    let mut in_quote = false;
    for ch in selector.chars() {
        match ch {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => paren_depth += 1,
            ')' if !in_quote => {
                paren_depth -= 1;
                if paren_depth < 0 {
                    return Err(SessionError::InvalidSelector(format!("unbalanced parentheses: {}", selector)));
                }
            }
            _ => {}
        }
    }
    if in_quote {
        return Err(SessionError::InvalidSelector(format!("unterminated string literal: {}", selector)));
    }
    if paren_depth != 0 {
        return Err(SessionError::InvalidSelector(format!("unbalanced parentheses: {}", selector)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_selectors_are_accepted() {
        assert!(validate_selector("type = 'order' AND (priority > 5)").is_ok());
    }

    #[test]
    fn unbalanced_parens_are_rejected() {
        assert!(validate_selector("(type = 'order'").is_err());
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert!(validate_selector("type = 'order").is_err());
    }
}
