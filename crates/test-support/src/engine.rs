//! In-memory protocol engine.
//!
//! A [`MockServer`] is registered per account JID; [`MockEngine::connect`]
//! attaches to the server registered for the configured JID, so every
//! reconnect of a session lands on the same scripted server. Tests use a
//! distinct JID each to stay independent when run in parallel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use parley_core::event::{RosterItem, Subscription};
use parley_xmpp::engine::{
    ConnectionConfig, InboundHandler, NodeSubscription, ProtocolEngine, PubSubEvent,
    PubSubHelper, PubSubItem, SubscriptionDecision,
};
use parley_xmpp::error::ConnectionError;
use parley_xmpp::stanza::Stanza;
use parley_xmpp::vcard::VCard;
use parley_xmpp::xmpp_parsers::jid::{BareJid, Jid};
use parley_xmpp::xmpp_parsers::message::Message;
use parley_xmpp::xmpp_parsers::presence::{Presence, Type as PresenceType};
use tracing::debug;

fn servers() -> &'static Mutex<HashMap<String, Arc<MockServer>>> {
    static SERVERS: OnceLock<Mutex<HashMap<String, Arc<MockServer>>>> = OnceLock::new();
    SERVERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Scripted reply to an IQ sent with `send_with_reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqReply {
    Result,
    Error,
}

/// A pubsub helper call observed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum PubSubCall {
    Subscribe { service: Jid, node: String },
    Create { service: Jid, node: String },
    Delete { service: Jid, node: String },
    Publish { service: Jid, node: String, item: PubSubItem },
}

#[derive(Default)]
struct ServerState {
    connect_calls: u32,
    close_calls: u32,
    connect_delay: Duration,
    connect_failures: VecDeque<ConnectionError>,
    auth_failure: Option<ConnectionError>,
    send_failures: VecDeque<ConnectionError>,
    fail_every_send: Option<ConnectionError>,
    close_failure: Option<ConnectionError>,
    sent: Vec<Stanza>,
    roster: HashMap<BareJid, RosterItem>,
    roster_failure: Option<ConnectionError>,
    iq_replies: VecDeque<IqReply>,
    iq_requests: Vec<Stanza>,
    pubsub_subscriptions: Vec<NodeSubscription>,
    pubsub_calls: Vec<PubSubCall>,
    vcards: HashMap<Option<BareJid>, VCard>,
    vcard_failure: Option<ConnectionError>,
    accepted_subscriptions: Vec<Jid>,
}

pub struct MockServer {
    jid: String,
    state: Mutex<ServerState>,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
    handler_registrations: Mutex<u32>,
}

impl MockServer {
    /// Register a fresh server for `jid`, replacing any earlier one.
    pub fn register(jid: &str) -> Arc<Self> {
        let server = Arc::new(Self {
            jid: jid.to_string(),
            state: Mutex::new(ServerState::default()),
            handler: Mutex::new(None),
            handler_registrations: Mutex::new(0),
        });
        servers()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(jid.to_string(), Arc::clone(&server));
        server
    }

    fn lookup(jid: &Jid) -> Option<Arc<Self>> {
        let servers = servers().lock().unwrap_or_else(PoisonError::into_inner);
        servers
            .get(&jid.to_string())
            .or_else(|| servers.get(&jid.to_bare().to_string()))
            .cloned()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn jid(&self) -> &str {
        &self.jid
    }

    // ── Scripting ─────────────────────────────────────────────────

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = delay;
    }

    pub fn fail_next_connect(&self, error: ConnectionError) {
        self.state().connect_failures.push_back(error);
    }

    pub fn fail_authentication(&self, error: ConnectionError) {
        self.state().auth_failure = Some(error);
    }

    pub fn fail_next_send(&self, error: ConnectionError) {
        self.state().send_failures.push_back(error);
    }

    pub fn fail_every_send(&self, error: ConnectionError) {
        self.state().fail_every_send = Some(error);
    }

    pub fn fail_close(&self, error: ConnectionError) {
        self.state().close_failure = Some(error);
    }

    pub fn set_roster_item(&self, jid: &str, subscription: Subscription) {
        let bare = parse_bare(jid);
        self.state()
            .roster
            .insert(bare.clone(), RosterItem::new(bare.to_string(), subscription));
    }

    pub fn load_roster(&self, items: Vec<RosterItem>) {
        let mut state = self.state();
        for item in items {
            state.roster.insert(parse_bare(&item.jid), item);
        }
    }

    pub fn fail_roster_lookups(&self, error: ConnectionError) {
        self.state().roster_failure = Some(error);
    }

    pub fn push_iq_reply(&self, reply: IqReply) {
        self.state().iq_replies.push_back(reply);
    }

    pub fn add_pubsub_subscription(
        &self,
        node: &str,
        subid: Option<&str>,
        affiliation: Option<&str>,
    ) {
        let jid: Jid = self.jid.parse().unwrap_or_else(|_| panic!("bad jid {}", self.jid));
        let mut attributes = std::collections::BTreeMap::new();
        attributes.insert("node".to_string(), node.to_string());
        attributes.insert("jid".to_string(), jid.to_string());
        if let Some(subid) = subid {
            attributes.insert("subid".to_string(), subid.to_string());
        }
        if let Some(affiliation) = affiliation {
            attributes.insert("affiliation".to_string(), affiliation.to_string());
        }
        self.state().pubsub_subscriptions.push(NodeSubscription {
            node: node.to_string(),
            jid,
            subid: subid.map(str::to_string),
            attributes,
        });
    }

    /// Store the vCard returned for `jid`, or for the account when `None`.
    pub fn set_vcard(&self, jid: Option<&str>, vcard: VCard) {
        self.state().vcards.insert(jid.map(parse_bare), vcard);
    }

    pub fn fail_vcard_fetch(&self, error: ConnectionError) {
        self.state().vcard_failure = Some(error);
    }

    // ── Observation ───────────────────────────────────────────────

    pub fn connect_calls(&self) -> u32 {
        self.state().connect_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.state().close_calls
    }

    pub fn handler_registrations(&self) -> u32 {
        *self
            .handler_registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sent(&self) -> Vec<Stanza> {
        self.state().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter_map(|stanza| match stanza {
                Stanza::Message(message) => Some(*message),
                _ => None,
            })
            .collect()
    }

    pub fn sent_presences(&self) -> Vec<Presence> {
        self.sent()
            .into_iter()
            .filter_map(|stanza| match stanza {
                Stanza::Presence(presence) => Some(*presence),
                _ => None,
            })
            .collect()
    }

    pub fn sent_presences_of_type(&self, type_: PresenceType) -> Vec<Presence> {
        self.sent_presences()
            .into_iter()
            .filter(|presence| presence.type_ == type_)
            .collect()
    }

    pub fn iq_requests(&self) -> Vec<Stanza> {
        self.state().iq_requests.clone()
    }

    pub fn pubsub_calls(&self) -> Vec<PubSubCall> {
        self.state().pubsub_calls.clone()
    }

    pub fn stored_vcard(&self) -> Option<VCard> {
        self.state().vcards.get(&None).cloned()
    }

    pub fn accepted_subscriptions(&self) -> Vec<Jid> {
        self.state().accepted_subscriptions.clone()
    }

    // ── Inbound injection ─────────────────────────────────────────

    fn handler(&self) -> Arc<dyn InboundHandler> {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| panic!("no inbound handler registered for {}", self.jid))
    }

    fn roster_item_for(&self, jid: Option<&Jid>) -> Option<RosterItem> {
        let jid = jid?;
        self.state().roster.get(&jid.to_bare()).cloned()
    }

    /// Dispatch a stanza the way a real engine routes inbound traffic.
    pub fn inject(&self, stanza: Stanza) {
        let handler = self.handler();
        match stanza {
            Stanza::Message(message) => handler.on_message(*message),
            Stanza::Iq(iq) => handler.on_iq(*iq),
            Stanza::Presence(presence) => match presence.type_ {
                PresenceType::Subscribe => {
                    let item = self.roster_item_for(presence.from.as_ref());
                    let from = presence.from.clone();
                    let decision = handler.on_subscription_request(item, *presence);
                    if decision == SubscriptionDecision::Accept {
                        if let Some(from) = from {
                            self.state().accepted_subscriptions.push(from);
                        }
                    }
                }
                PresenceType::Subscribed => {
                    let item = self.roster_item_for(presence.from.as_ref());
                    handler.on_subscription(item, *presence);
                }
                _ => handler.on_presence(*presence),
            },
        }
    }

    pub fn inject_xml(&self, xml: &str) {
        let stanza = Stanza::parse(xml.as_bytes())
            .unwrap_or_else(|error| panic!("invalid injected stanza: {error}"));
        self.inject(stanza);
    }

    pub fn inject_pubsub_event(&self, event: PubSubEvent) {
        self.handler().on_pubsub_event(event);
    }
}

fn parse_bare(jid: &str) -> BareJid {
    jid.parse::<BareJid>()
        .unwrap_or_else(|error| panic!("invalid jid {jid}: {error}"))
}

fn iq_reply(request: &Stanza, reply: IqReply) -> Stanza {
    let id = match request {
        Stanza::Iq(iq) => iq.id().to_string(),
        _ => String::new(),
    };
    let xml = match reply {
        IqReply::Result => format!("<iq xmlns='jabber:client' type='result' id='{id}'/>"),
        IqReply::Error => format!(
            "<iq xmlns='jabber:client' type='error' id='{id}'><error type='cancel'><item-not-found xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>"
        ),
    };
    Stanza::parse(xml.as_bytes()).unwrap_or_else(|error| panic!("bad iq reply: {error}"))
}

/// One connection to a [`MockServer`].
pub struct MockEngine {
    server: Arc<MockServer>,
    connected: AtomicBool,
}

impl MockEngine {
    pub fn server(&self) -> &Arc<MockServer> {
        &self.server
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::TransportError(
                "mock engine is closed".to_string(),
            ))
        }
    }
}

impl PubSubHelper for MockEngine {
    async fn subscribe_to(&self, service: &Jid, node: &str) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.server.state().pubsub_calls.push(PubSubCall::Subscribe {
            service: service.clone(),
            node: node.to_string(),
        });
        Ok(())
    }

    async fn create_node(&self, service: &Jid, node: &str) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.server.state().pubsub_calls.push(PubSubCall::Create {
            service: service.clone(),
            node: node.to_string(),
        });
        Ok(())
    }

    async fn delete_node(&self, service: &Jid, node: &str) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.server.state().pubsub_calls.push(PubSubCall::Delete {
            service: service.clone(),
            node: node.to_string(),
        });
        Ok(())
    }

    async fn publish_item_to(
        &self,
        service: &Jid,
        node: &str,
        item: PubSubItem,
    ) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.server.state().pubsub_calls.push(PubSubCall::Publish {
            service: service.clone(),
            node: node.to_string(),
            item,
        });
        Ok(())
    }

    async fn subscriptions_from_all_nodes(
        &self,
        _service: &Jid,
    ) -> Result<Vec<NodeSubscription>, ConnectionError> {
        self.ensure_connected()?;
        Ok(self.server.state().pubsub_subscriptions.clone())
    }
}

impl ProtocolEngine for MockEngine {
    async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let server = MockServer::lookup(&config.jid).ok_or_else(|| {
            ConnectionError::TransportError(format!("no mock server for {}", config.jid))
        })?;

        let (delay, failure) = {
            let mut state = server.state();
            state.connect_calls += 1;
            (state.connect_delay, state.connect_failures.pop_front())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        debug!(jid = %config.jid, "Mock engine connected");
        Ok(Self {
            server,
            connected: AtomicBool::new(true),
        })
    }

    async fn authenticate(&self, _password: &str) -> Result<(), ConnectionError> {
        match self.server.state().auth_failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.connected.store(false, Ordering::SeqCst);
        let mut state = self.server.state();
        state.close_calls += 1;
        match state.close_failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, stanza: Stanza) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        let mut state = self.server.state();
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.fail_every_send.clone() {
            return Err(error);
        }
        state.sent.push(stanza);
        Ok(())
    }

    async fn send_with_reply(&self, stanza: Stanza) -> Result<Stanza, ConnectionError> {
        self.ensure_connected()?;
        let mut state = self.server.state();
        let reply = state.iq_replies.pop_front().unwrap_or(IqReply::Result);
        let response = iq_reply(&stanza, reply);
        state.iq_requests.push(stanza);
        Ok(response)
    }

    fn register_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self
            .server
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
        *self
            .server
            .handler_registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
    }

    async fn find_item(&self, jid: &BareJid) -> Result<Option<RosterItem>, ConnectionError> {
        self.ensure_connected()?;
        let state = self.server.state();
        if let Some(error) = state.roster_failure.clone() {
            return Err(error);
        }
        Ok(state.roster.get(jid).cloned())
    }

    async fn roster_items(&self) -> Result<Vec<RosterItem>, ConnectionError> {
        self.ensure_connected()?;
        let state = self.server.state();
        if let Some(error) = state.roster_failure.clone() {
            return Err(error);
        }
        let mut items: Vec<RosterItem> = state.roster.values().cloned().collect();
        items.sort_by(|a, b| a.jid.cmp(&b.jid));
        Ok(items)
    }

    async fn accept_subscription(&self, jid: &Jid) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.server
            .state()
            .accepted_subscriptions
            .push(jid.clone());
        Ok(())
    }

    async fn fetch_vcard(&self, jid: Option<&BareJid>) -> Result<VCard, ConnectionError> {
        self.ensure_connected()?;
        let state = self.server.state();
        if let Some(error) = state.vcard_failure.clone() {
            return Err(error);
        }
        Ok(state.vcards.get(&jid.cloned()).cloned().unwrap_or_default())
    }

    async fn update_vcard(&self, vcard: VCard) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.server.state().vcards.insert(None, vcard);
        Ok(())
    }
}
