use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};
use xmpp_parsers::presence::Presence;

use crate::engine::{ConnectionConfig, InboundHandler, ProtocolEngine};
use crate::error::ConnectionError;
use crate::stanza::Stanza;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `explicit` is set by a user-requested disconnect; no implicit
    /// reconnect happens until `reconnect` clears it.
    Disconnected { explicit: bool },
    Connecting,
    Connected,
}

/// Owns the live protocol engine and keeps it alive across transport
/// failures.
pub struct ConnectionManager<E>
where
    E: ProtocolEngine,
{
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    engine: RwLock<Option<Arc<E>>>,
    connect_lock: tokio::sync::Mutex<()>,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
    presence: Mutex<Option<Presence>>,
}

impl<E> ConnectionManager<E>
where
    E: ProtocolEngine,
{
    pub const MAX_SEND_ATTEMPTS: u32 = 3;

    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ConnectionState::Disconnected { explicit: false }),
            engine: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            handler: RwLock::new(None),
            presence: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn current_engine(&self) -> Option<Arc<E>> {
        self.engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_engine(&self) -> Option<Arc<E>> {
        self.engine
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_connected(&self) -> bool {
        self.current_engine()
            .is_some_and(|engine| engine.is_connected())
    }

    /// Install the observer registered with every engine this manager
    /// connects. Also registers it with the live engine, if any.
    pub fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        if let Some(engine) = self.current_engine() {
            engine.register_handler(Arc::clone(&handler));
        }
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn handler(&self) -> Option<Arc<dyn InboundHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn stored_presence(&self) -> Option<Presence> {
        self.presence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_disabled(&self) -> bool {
        matches!(self.state(), ConnectionState::Disconnected { explicit: true })
    }

    /// Mark the link down without clearing an explicit disconnect.
    fn mark_down(state: &mut ConnectionState) {
        if !matches!(state, ConnectionState::Disconnected { explicit: true }) {
            *state = ConnectionState::Disconnected { explicit: false };
        }
    }

    /// Establish a fresh authenticated engine.
    ///
    /// Returns immediately when another caller is already connecting.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        if self.is_disabled() {
            return Err(ConnectionError::Disabled);
        }

        let Ok(_guard) = self.connect_lock.try_lock() else {
            debug!(jid = %self.config.jid, "Connect already in progress");
            return Ok(());
        };
        self.connect_locked().await.map(|_| ())
    }

    /// Replace the live engine. Callers hold `connect_lock`.
    async fn connect_locked(&self) -> Result<Arc<E>, ConnectionError> {
        if let Some(engine) = self.take_engine() {
            self.close_quietly(&engine).await;
        }

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, ConnectionState::Disconnected { explicit: true }) {
                return Err(ConnectionError::Disabled);
            }
            *state = ConnectionState::Connecting;
        }

        let engine = match self.establish().await {
            Ok(engine) => engine,
            Err(error) => {
                Self::mark_down(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
                warn!(jid = %self.config.jid, error = %error, "Connect failed");
                return Err(error);
            }
        };

        // The engine is published under the state lock so that a disconnect
        // racing the handshake either sees it or stops it from going live.
        let published = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, ConnectionState::Disconnected { explicit: true }) {
                false
            } else {
                *self.engine.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&engine));
                *state = ConnectionState::Connected;
                true
            }
        };
        if !published {
            info!(
                jid = %self.config.jid,
                "Disconnected during handshake; dropping new connection"
            );
            self.close_quietly(&engine).await;
            return Err(ConnectionError::Disabled);
        }
        info!(jid = %self.config.jid, "Connected");

        if let Some(presence) = self.stored_presence() {
            if let Err(error) = engine.send(Stanza::from(presence)).await {
                warn!(error = %error, "Failed to restore presence after connect");
            }
        }
        Ok(engine)
    }

    async fn establish(&self) -> Result<Arc<E>, ConnectionError> {
        let engine = E::connect(&self.config).await?;
        if let Err(error) = engine.authenticate(&self.config.password).await {
            self.close_quietly(&engine).await;
            return Err(error);
        }

        if let Some(handler) = self.handler() {
            engine.register_handler(handler);
        }
        Ok(Arc::new(engine))
    }

    async fn close_quietly(&self, engine: &E) {
        if !engine.is_connected() {
            return;
        }
        if let Err(error) = engine.close().await {
            warn!(error = %error, "Ignoring error while closing connection");
        }
    }

    fn live_engine(&self) -> Option<Arc<E>> {
        self.current_engine().filter(|engine| engine.is_connected())
    }

    /// The live engine, connecting first if there is none.
    ///
    /// A caller arriving while another connect is in flight waits for it
    /// and uses the engine it produced.
    pub async fn engine(&self) -> Result<Arc<E>, ConnectionError> {
        if let Some(engine) = self.live_engine() {
            return Ok(engine);
        }
        if self.is_disabled() {
            return Err(ConnectionError::Disabled);
        }

        let _guard = match self.connect_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(jid = %self.config.jid, "Waiting for in-flight connect");
                let guard = self.connect_lock.lock().await;
                if let Some(engine) = self.live_engine() {
                    return Ok(engine);
                }
                guard
            }
        };
        self.connect_locked().await
    }

    /// Send with reconnect-and-retry on transport failure, at most
    /// [`Self::MAX_SEND_ATTEMPTS`] attempts.
    ///
    /// An explicit disconnect during the backoff ends the retries with the
    /// error that started them.
    pub async fn send(&self, stanza: Stanza) -> Result<(), ConnectionError> {
        let mut attempt = 1;
        loop {
            let result = match self.engine().await {
                Ok(engine) => engine.send(stanza.clone()).await,
                Err(error) => Err(error),
            };

            let error = match result {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            let Some(delay) = error.retry_delay(attempt) else {
                return Err(error);
            };
            if attempt >= Self::MAX_SEND_ATTEMPTS {
                warn!(stanza = stanza.name(), attempt, error = %error, "Giving up on send");
                return Err(error);
            }

            warn!(
                stanza = stanza.name(),
                attempt,
                delay_secs = delay.as_secs(),
                error = %error,
                "Send failed; reconnecting"
            );
            tokio::time::sleep(delay).await;
            if self.is_disabled() {
                info!(
                    stanza = stanza.name(),
                    attempt,
                    "Disconnected during send backoff; not retrying"
                );
                return Err(error);
            }

            self.drop_transport().await;
            if let Err(reconnect_error) = self.connect().await {
                warn!(error = %reconnect_error, "Reconnect during send retry failed");
            }
            attempt += 1;
        }
    }

    /// Send an IQ and await its reply. Not retried.
    pub async fn send_with_reply(&self, stanza: Stanza) -> Result<Stanza, ConnectionError> {
        self.engine().await?.send_with_reply(stanza).await
    }

    /// Close the live engine after a transport failure. Leaves an explicit
    /// disconnect in place.
    async fn drop_transport(&self) {
        let engine = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            Self::mark_down(&mut state);
            self.take_engine()
        };
        if let Some(engine) = engine {
            self.close_quietly(&engine).await;
        }
    }

    /// Close the live engine, if any. Close errors are logged and dropped.
    ///
    /// With `auto_reconnect` the next operation reconnects implicitly;
    /// without it the manager stays down until [`Self::reconnect`].
    pub async fn disconnect(&self, auto_reconnect: bool) {
        let engine = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            *state = ConnectionState::Disconnected {
                explicit: !auto_reconnect,
            };
            self.take_engine()
        };
        if let Some(engine) = engine {
            self.close_quietly(&engine).await;
        }
        info!(jid = %self.config.jid, auto_reconnect, "Disconnected");
    }

    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        if matches!(self.state(), ConnectionState::Disconnected { explicit: true }) {
            self.set_state(ConnectionState::Disconnected { explicit: false });
        }
        self.connect().await
    }

    /// Send `presence` and remember it for re-sending on every later connect.
    pub async fn update_presence(&self, presence: Presence) -> Result<(), ConnectionError> {
        let result = self.send(Stanza::from(presence.clone())).await;
        *self.presence.lock().unwrap_or_else(PoisonError::into_inner) = Some(presence);
        result
    }
}
