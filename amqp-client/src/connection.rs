use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use amqp_wire::{ChannelId, Delivery, FailoverMutex, ProtocolHandler, WireError};
use amqp_session::{AckMode, BounceError, Session, SessionConfig, SessionError};

use crate::heartbeat::Heartbeat;

/// The connection's fail-over mutex (spec §4.2, §5): held for the
/// duration of every protocol round-trip a session issues, and by
/// `Connection::failed_over` while every session resubscribes, so a
/// running round-trip either completes before fail-over starts or the
/// transport aborts it before fail-over can proceed.
#[derive(Default)]
pub struct ConnectionFailoverMutex {
    inner: Mutex<()>,
}

impl ConnectionFailoverMutex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FailoverMutex for ConnectionFailoverMutex {
    fn run_guarded(&self, op: &mut dyn FnMut() -> Result<(), WireError>) -> Result<(), WireError> {
        let _guard = self.inner.lock();
        op()
    }
}

/// Owns the transport-facing `ProtocolHandler`, the fail-over mutex every
/// session's round-trips share, and the set of sessions this process has
/// opened over one physical connection (spec §3: "created by a Connection
/// factory"). Hands out `Session`s, routes inbound frames to the session
/// that owns their channel, and drives resubscription across every open
/// session when the transport reports a fail-over event.
pub struct Connection {
    handler: Arc<dyn ProtocolHandler>,
    failover_mutex: Arc<dyn FailoverMutex>,
    config: SessionConfig,
    sessions: Mutex<HashMap<ChannelId, Session>>,
    next_channel: AtomicU16,
    error_sink: Arc<dyn Fn(SessionError) + Send + Sync>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl Connection {
    pub fn new(
        handler: Arc<dyn ProtocolHandler>,
        config: SessionConfig,
        error_sink: Arc<dyn Fn(SessionError) + Send + Sync>,
    ) -> Arc<Connection> {
        Arc::new(Connection {
            handler,
            failover_mutex: Arc::new(ConnectionFailoverMutex::new()),
            config,
            sessions: Mutex::new(HashMap::new()),
            next_channel: AtomicU16::new(1),
            error_sink,
            heartbeat: Mutex::new(None),
        })
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn next_channel_id(&self) -> ChannelId {
        self.next_channel.fetch_add(1, Ordering::SeqCst)
    }

    /// Opens a new session on the next free channel. `transactional`
    /// fixes the acknowledgement mode to `Transacted` regardless of
    /// `ack_mode` (spec §3's session invariant) and drives the one-time
    /// `tx.select` round-trip before handing the session back.
    pub fn create_session(&self, transactional: bool, ack_mode: AckMode) -> amqp_session::Result<Session> {
        let channel = self.next_channel_id();
        let ack_mode = if transactional { AckMode::Transacted } else { ack_mode };

        let sink = Arc::clone(&self.error_sink);
        let bounce_sink: Box<dyn Fn(BounceError) + Send + Sync> = Box::new(move |bounce| {
            sink(SessionError::ProtocolError(format!(
                "{:?}: {} (exchange={}, routing_key={})",
                bounce.kind, bounce.reply_text, bounce.exchange, bounce.routing_key
            )));
        });

        let session = Session::new(
            channel,
            transactional,
            ack_mode,
            self.config,
            Arc::clone(&self.handler),
            Arc::clone(&self.failover_mutex),
            bounce_sink,
        );

        if transactional {
            if let Err(err) = session.select_transacted() {
                let _ = session.close();
                return Err(err);
            }
        }

        self.sessions.lock().insert(channel, session.clone());
        Ok(session)
    }

    /// Entry point for the network I/O thread (spec's `messageReceived`):
    /// routes a decoded frame to the session owning its channel. Must not
    /// block; all the work that might is the session's to do on its own
    /// threads.
    pub fn message_received(&self, channel: ChannelId, delivery: Delivery) {
        match self.sessions.lock().get(&channel).cloned() {
            Some(session) => session.message_received(delivery),
            None => warn!("delivery for unknown channel {}", channel),
        }
    }

    /// Called by the transport once it has rebuilt the connection after a
    /// fail-over event, while holding the fail-over mutex (spec §4.5
    /// "resubscribe"). Resubscribes every open session; a session whose
    /// resubscription fails is logged and left alone rather than aborting
    /// the rest.
    pub fn failed_over(&self) {
        let sessions: Vec<Session> = self.sessions.lock().values().cloned().collect();
        for session in sessions {
            if let Err(err) = session.resubscribe() {
                warn!("resubscribe failed for channel {}: {}", session.channel(), err);
            }
        }
    }

    /// Server-initiated close of the whole connection (spec §7): every
    /// open session is torn down and the connection's error sink is
    /// notified once, after the sessions are gone.
    pub fn closed(&self, reason: SessionError) {
        error!("connection closed: {}", reason);
        let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, session)| session).collect();
        for session in sessions {
            let _ = session.close();
        }
        (self.error_sink)(reason);
    }

    pub fn close_session(&self, channel: ChannelId) -> amqp_session::Result<()> {
        if let Some(session) = self.sessions.lock().remove(&channel) {
            session.close()?;
        }
        Ok(())
    }

    /// Starts a background heartbeat on `interval`, writing a keep-alive
    /// frame through the handler on every tick (`SPEC_FULL.md` §5).
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) {
        let connection = Arc::clone(self);
        let heartbeat = Heartbeat::start(interval, move || {
            let handler = &connection.handler;
            let mut write = || handler.send_heartbeat();
            if let Err(err) = connection.failover_mutex.run_guarded(&mut write) {
                warn!("heartbeat write failed: {}", err);
            }
        });
        *self.heartbeat.lock() = Some(heartbeat);
    }

    pub fn stop_heartbeat(&self) {
        self.heartbeat.lock().take();
    }
}
