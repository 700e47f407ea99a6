//! The public session facade.
//!
//! A [`Session`] owns one [`ConnectionManager`], the queue bus its inbound
//! router fills, and the deferred delivery worker. Everything the
//! application does goes through it.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use parley_core::config::{self, AccountConfig, Config};
use parley_core::event::{ChatState, MessageType, PresenceShow, RosterItem};
use parley_core::queue::QueueName;
use parley_messaging::{DeferredDeliveryWorker, OutgoingBody};
use parley_presence::PresenceUpdate;
use parley_roster::{Contact, ContactDirectory};
use parley_xmpp::stanza::{self, parse_jid};
use parley_xmpp::xmpp_parsers::iq::Iq;
use parley_xmpp::xmpp_parsers::jid::{BareJid, Jid};
use parley_xmpp::xmpp_parsers::message::Message;
use parley_xmpp::{
    ConnectionConfig, ConnectionManager, ConnectionState, ProtocolEngine, PubSubError,
    PubSubEvent, PubSubSession, StanzaError, VCard,
};

use crate::bus::{EventQueueBus, SubscriptionNotice};
use crate::error::Result;
use crate::inbound::InboundRouter;
use crate::outbound::Courier;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub jid: String,
    pub password: String,
    /// Initial presence; `None` is plain available.
    pub presence: Option<PresenceShow>,
    pub status_message: String,
    pub host: Option<String>,
    pub port: u16,
    pub accept_subscriptions: bool,
    pub delivery_interval: Duration,
    pub pubsub_enabled: bool,
    /// Defaults to `pubsub.<account domain>`.
    pub pubsub_service: Option<String>,
}

impl SessionConfig {
    pub fn new(jid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            password: password.into(),
            presence: None,
            status_message: "Available".to_string(),
            host: None,
            port: AccountConfig::DEFAULT_PORT,
            accept_subscriptions: true,
            delivery_interval: DeferredDeliveryWorker::DEFAULT_INTERVAL,
            pubsub_enabled: true,
            pubsub_service: None,
        }
    }

    /// Settings from the config file at the platform path.
    pub fn load() -> Result<Self> {
        Ok(Self::from(&config::load_config()?))
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::from(&config::load_config_from(path.into())?))
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            jid: config.account.jid.clone(),
            password: config.account.password.clone(),
            presence: config.presence.show(),
            status_message: config.presence.status.clone(),
            host: config.account.server.clone(),
            port: config.account.port_or_default(),
            accept_subscriptions: config.subscriptions.auto_accept,
            delivery_interval: config.delivery.retry_interval(),
            pubsub_enabled: config.pubsub.enabled,
            pubsub_service: config.pubsub.service.clone(),
        }
    }
}

pub struct Session<E>
where
    E: ProtocolEngine,
{
    config: SessionConfig,
    connection: Arc<ConnectionManager<E>>,
    bus: Arc<EventQueueBus>,
    contacts: Arc<ContactDirectory>,
    router: Arc<InboundRouter>,
    courier: Arc<Courier<E>>,
    worker: Mutex<Option<DeferredDeliveryWorker>>,
    pubsub: RwLock<Option<Arc<PubSubSession<E>>>>,
    status: Mutex<(Option<PresenceShow>, Option<String>)>,
}

impl<E> Session<E>
where
    E: ProtocolEngine,
{
    /// Build a session without touching the network.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let jid = parse_jid(&config.jid)?;
        let connection = Arc::new(ConnectionManager::new(ConnectionConfig {
            jid,
            password: config.password.clone(),
            host: config.host.clone(),
            port: config.port,
        }));

        let bus = Arc::new(EventQueueBus::new());
        let contacts = Arc::new(ContactDirectory::new());
        let router = Arc::new(InboundRouter::new(
            Arc::clone(&bus),
            Arc::clone(&contacts),
            config.accept_subscriptions,
        ));
        connection.set_handler(router.clone());

        let courier = Arc::new(Courier::new(
            Arc::clone(&connection),
            Arc::clone(&contacts),
            Arc::clone(&bus.pending_messages),
        ));

        let status = (config.presence, Some(config.status_message.clone()));
        Ok(Self {
            config,
            connection,
            bus,
            contacts,
            router,
            courier,
            worker: Mutex::new(None),
            pubsub: RwLock::new(None),
            status: Mutex::new(status),
        })
    }

    /// Connect, announce the initial presence, start the deferred delivery
    /// worker and associate the default pubsub service.
    pub async fn start(&self) -> Result<()> {
        self.connection.connect().await?;

        let (show, message) = self
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.status(show, message.as_deref()).await?;

        self.start_worker();

        if self.config.pubsub_enabled {
            let service = self.config.pubsub_service.clone().unwrap_or_else(|| {
                format!("pubsub.{}", self.connection.config().jid.domain())
            });
            if let Err(error) = self.set_pubsub_service(&service) {
                debug!(service = %service, error = %error, "Default pubsub service not configured");
            }
        }

        info!(jid = %self.connection.config().jid, "Session started");
        Ok(())
    }

    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let session = Self::new(config)?;
        session.start().await?;
        Ok(session)
    }

    fn start_worker(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(DeferredDeliveryWorker::is_running) {
            return;
        }
        *worker = Some(DeferredDeliveryWorker::spawn(
            Arc::clone(&self.bus.pending_messages),
            Arc::clone(&self.courier),
            self.config.delivery_interval,
        ));
    }

    /// Stop the worker and close the connection for good.
    pub async fn shutdown(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
        self.connection.disconnect(false).await;
        info!(jid = %self.connection.config().jid, "Session shut down");
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn reconnect(&self) -> Result<()> {
        Ok(self.connection.reconnect().await?)
    }

    /// Close the connection. Nothing reconnects until [`Session::reconnect`].
    pub async fn disconnect(&self) {
        self.connection.disconnect(false).await;
    }

    // ── Messaging ─────────────────────────────────────────────────

    pub async fn deliver<I, S>(&self, destinations: I, message: impl Into<OutgoingBody>) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.deliver_with(destinations, message, MessageType::Chat, ChatState::Active)
            .await
    }

    pub async fn deliver_with<I, S>(
        &self,
        destinations: I,
        message: impl Into<OutgoingBody>,
        message_type: MessageType,
        chat_state: ChatState,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let contacts = self.contacts.resolve_many(destinations)?;
        let body = message.into();
        self.courier
            .deliver(&contacts, &body, message_type, chat_state)
            .await
    }

    /// Queue a message for later delivery without asking for authorization.
    pub fn deliver_deferred(
        &self,
        destination: &str,
        message: impl Into<OutgoingBody>,
        message_type: MessageType,
    ) -> Result<()> {
        let contact = self.contacts.resolve_one(destination)?;
        self.courier
            .deliver_deferred(contact.address(), message.into(), message_type);
        Ok(())
    }

    // ── Roster ────────────────────────────────────────────────────

    pub async fn add<I, S>(&self, destinations: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let contacts = self.contacts.resolve_many(destinations)?;
        self.courier.add(&contacts).await
    }

    pub async fn remove<I, S>(&self, destinations: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let contacts = self.contacts.resolve_many(destinations)?;
        self.courier.remove(&contacts).await
    }

    pub async fn subscribed_to(&self, jid: &str) -> Result<bool> {
        Ok(self
            .contacts
            .is_subscribed_to(jid, self.connection.as_ref())
            .await?)
    }

    pub async fn contact_list(&self) -> Result<Vec<RosterItem>> {
        Ok(self.connection.engine().await?.roster_items().await?)
    }

    pub fn contact(&self, jid: &str) -> Result<Arc<Contact>> {
        Ok(self.contacts.resolve_one(jid)?)
    }

    /// Approve a subscription request left in `subscription_requests`.
    pub async fn approve_subscription(&self, jid: &str) -> Result<()> {
        let jid = parse_jid(jid)?;
        self.connection
            .engine()
            .await?
            .accept_subscription(&jid)
            .await?;
        info!(jid = %jid, "Approved subscription request");
        Ok(())
    }

    pub fn accept_subscriptions(&self) -> bool {
        self.router.accepts_subscriptions()
    }

    pub fn set_accept_subscriptions(&self, accept: bool) {
        self.router.set_accept_subscriptions(accept);
    }

    // ── Presence and vCard ────────────────────────────────────────

    /// Broadcast presence. The account's avatar hash is attached when its
    /// vCard has a photo; a failed lookup only drops the hash.
    pub async fn status(&self, show: Option<PresenceShow>, message: Option<&str>) -> Result<()> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) =
            (show, message.map(str::to_string));

        let avatar_hash = match self.avatar_hash().await {
            Ok(hash) => hash,
            Err(error) => {
                warn!(error = %error, "Avatar lookup failed; sending without photo hash");
                None
            }
        };

        let presence = stanza::status_presence(show, message, avatar_hash.as_deref());
        self.connection.update_presence(presence).await?;
        debug!(show = ?show, "Status updated");
        Ok(())
    }

    /// vCard of `jid`, or of this account when `None`.
    pub async fn get_info(&self, jid: Option<&str>) -> Result<VCard> {
        let jid = jid
            .map(|jid| {
                jid.parse::<BareJid>()
                    .map_err(|error| StanzaError::InvalidJid(format!("'{jid}': {error}")))
            })
            .transpose()?;
        Ok(self
            .connection
            .engine()
            .await?
            .fetch_vcard(jid.as_ref())
            .await?)
    }

    pub async fn update_info(&self, vcard: VCard) -> Result<()> {
        self.connection
            .engine()
            .await?
            .update_vcard(vcard)
            .await?;
        Ok(())
    }

    /// SHA-1 hex of the account's vCard photo, if it has one.
    pub async fn avatar_hash(&self) -> Result<Option<String>> {
        Ok(self.get_info(None).await?.avatar_hash()?)
    }

    // ── Queues ────────────────────────────────────────────────────

    pub fn queue_len(&self, name: QueueName) -> usize {
        self.bus.len(name)
    }

    pub fn received_messages(&self) -> Vec<Message> {
        self.bus.received_messages.drain(EventQueueBus::DEFAULT_DRAIN)
    }

    pub fn received_messages_with<F>(&self, f: F) -> usize
    where
        F: FnMut(Message) -> ControlFlow<()>,
    {
        self.bus
            .received_messages
            .drain_with(EventQueueBus::DEFAULT_DRAIN, f)
    }

    pub fn has_received_messages(&self) -> bool {
        !self.bus.received_messages.is_empty()
    }

    pub fn presence_updates(&self) -> Vec<PresenceUpdate> {
        self.bus.presence_updates.drain(EventQueueBus::DEFAULT_DRAIN)
    }

    pub fn presence_updates_with<F>(&self, f: F) -> usize
    where
        F: FnMut(PresenceUpdate) -> ControlFlow<()>,
    {
        self.bus
            .presence_updates
            .drain_with(EventQueueBus::DEFAULT_DRAIN, f)
    }

    pub fn has_presence_updates(&self) -> bool {
        !self.bus.presence_updates.is_empty()
    }

    pub fn new_subscriptions(&self) -> Vec<SubscriptionNotice> {
        self.bus.new_subscriptions.drain(EventQueueBus::DEFAULT_DRAIN)
    }

    pub fn new_subscriptions_with<F>(&self, f: F) -> usize
    where
        F: FnMut(SubscriptionNotice) -> ControlFlow<()>,
    {
        self.bus
            .new_subscriptions
            .drain_with(EventQueueBus::DEFAULT_DRAIN, f)
    }

    pub fn has_new_subscriptions(&self) -> bool {
        !self.bus.new_subscriptions.is_empty()
    }

    pub fn subscription_requests(&self) -> Vec<SubscriptionNotice> {
        self.bus
            .subscription_requests
            .drain(EventQueueBus::DEFAULT_DRAIN)
    }

    pub fn subscription_requests_with<F>(&self, f: F) -> usize
    where
        F: FnMut(SubscriptionNotice) -> ControlFlow<()>,
    {
        self.bus
            .subscription_requests
            .drain_with(EventQueueBus::DEFAULT_DRAIN, f)
    }

    pub fn has_subscription_requests(&self) -> bool {
        !self.bus.subscription_requests.is_empty()
    }

    pub fn iq_stanzas(&self) -> Vec<Iq> {
        self.bus.iq_stanzas.drain(EventQueueBus::DEFAULT_DRAIN)
    }

    pub fn iq_stanzas_with<F>(&self, f: F) -> usize
    where
        F: FnMut(Iq) -> ControlFlow<()>,
    {
        self.bus.iq_stanzas.drain_with(EventQueueBus::DEFAULT_DRAIN, f)
    }

    pub fn has_iq_stanzas(&self) -> bool {
        !self.bus.iq_stanzas.is_empty()
    }

    pub fn received_events(&self) -> Vec<PubSubEvent> {
        self.bus.received_events.drain(EventQueueBus::DEFAULT_DRAIN)
    }

    pub fn received_events_with<F>(&self, f: F) -> usize
    where
        F: FnMut(PubSubEvent) -> ControlFlow<()>,
    {
        self.bus
            .received_events
            .drain_with(EventQueueBus::DEFAULT_DRAIN, f)
    }

    pub fn has_received_events(&self) -> bool {
        !self.bus.received_events.is_empty()
    }

    /// Start or stop queueing inbound IQs. Off by default.
    pub fn capture_iq_stanzas(&self, enabled: bool) {
        self.router.set_capture_iq(enabled);
    }

    pub fn captures_iq_stanzas(&self) -> bool {
        self.router.captures_iq()
    }

    // ── PubSub ────────────────────────────────────────────────────

    pub fn has_pubsub(&self) -> bool {
        self.pubsub
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Associate this session with a pubsub service. Only one association
    /// is allowed per session.
    pub fn set_pubsub_service(&self, service: &str) -> Result<()> {
        if matches!(
            self.connection.state(),
            ConnectionState::Disconnected { explicit: true }
        ) {
            return Err(PubSubError::NotConnected.into());
        }

        let jid = service
            .parse::<Jid>()
            .map_err(|error| PubSubError::InvalidJid(format!("'{service}': {error}")))?;

        let mut slot = self.pubsub.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            return Err(PubSubError::AlreadySet(existing.service().to_string()).into());
        }
        *slot = Some(Arc::new(PubSubSession::new(
            jid,
            Arc::clone(&self.connection),
        )));
        drop(slot);

        self.router.enable_pubsub_events();
        info!(service = %service, "PubSub service configured");
        Ok(())
    }

    pub fn pubsub(&self) -> Result<Arc<PubSubSession<E>>> {
        self.pubsub
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| PubSubError::NoPubSubService.into())
    }
}
