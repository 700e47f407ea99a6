use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use xmpp_parsers::iq::Iq;
use xmpp_parsers::jid::{BareJid, Jid};
use xmpp_parsers::message::Message;
use xmpp_parsers::minidom::Element;
use xmpp_parsers::presence::Presence;

use parley_core::event::RosterItem;

use crate::error::ConnectionError;
use crate::stanza::Stanza;
use crate::vcard::VCard;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub jid: Jid,
    pub password: String,
    /// Overrides the host derived from the JID's domain.
    pub host: Option<String>,
    pub port: u16,
}

/// What the engine should do with an incoming subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionDecision {
    Accept,
    Defer,
}

/// An item to publish to a pubsub node.
#[derive(Debug, Clone, PartialEq)]
pub struct PubSubItem {
    pub id: Option<String>,
    pub payload: Element,
}

impl PubSubItem {
    pub fn new(payload: Element) -> Self {
        Self { id: None, payload }
    }
}

/// One subscription reported by the pubsub service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSubscription {
    pub node: String,
    pub jid: Jid,
    pub subid: Option<String>,
    /// Raw attributes of the `<subscription/>` element.
    pub attributes: BTreeMap<String, String>,
}

impl NodeSubscription {
    pub fn affiliation(&self) -> Option<&str> {
        self.attributes.get("affiliation").map(String::as_str)
    }
}

/// An inbound pubsub event notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PubSubEvent {
    pub from: Option<Jid>,
    pub payload: Element,
}

/// Observer for everything the engine receives.
///
/// One handler is registered per engine and covers every event kind. Calls
/// arrive on the engine's own threads and must not block.
pub trait InboundHandler: Send + Sync {
    fn on_message(&self, message: Message);

    fn on_presence(&self, presence: Presence);

    /// Presence of type `subscribed`, with the sender's roster entry if any.
    fn on_subscription(&self, item: Option<RosterItem>, presence: Presence);

    /// Presence of type `subscribe`. On `Accept` the engine approves the
    /// request itself.
    fn on_subscription_request(
        &self,
        item: Option<RosterItem>,
        presence: Presence,
    ) -> SubscriptionDecision;

    fn on_iq(&self, iq: Iq);

    fn on_pubsub_event(&self, event: PubSubEvent);
}

/// Publish/subscribe helper bound to an engine's transport.
pub trait PubSubHelper: Send + Sync {
    fn subscribe_to(
        &self,
        service: &Jid,
        node: &str,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn create_node(
        &self,
        service: &Jid,
        node: &str,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn delete_node(
        &self,
        service: &Jid,
        node: &str,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn publish_item_to(
        &self,
        service: &Jid,
        node: &str,
        item: PubSubItem,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn subscriptions_from_all_nodes(
        &self,
        service: &Jid,
    ) -> impl Future<Output = Result<Vec<NodeSubscription>, ConnectionError>> + Send;
}

/// The external XMPP stack: transport, authentication, roster and vCard
/// storage, plus stanza serialization.
///
/// All methods take `&self`; a connected engine is shared behind an `Arc`.
pub trait ProtocolEngine: PubSubHelper + 'static {
    fn connect(
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<Self, ConnectionError>> + Send
    where
        Self: Sized;

    fn authenticate(&self, password: &str)
    -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn is_connected(&self) -> bool;

    fn send(&self, stanza: Stanza) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Send an IQ and wait for the reply carrying the same id.
    fn send_with_reply(
        &self,
        stanza: Stanza,
    ) -> impl Future<Output = Result<Stanza, ConnectionError>> + Send;

    fn register_handler(&self, handler: Arc<dyn InboundHandler>);

    fn find_item(
        &self,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, ConnectionError>> + Send;

    fn roster_items(&self) -> impl Future<Output = Result<Vec<RosterItem>, ConnectionError>> + Send;

    /// Approve a pending subscription request from `jid`.
    fn accept_subscription(
        &self,
        jid: &Jid,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Fetch the vCard of `jid`, or of the account itself when `None`.
    fn fetch_vcard(
        &self,
        jid: Option<&BareJid>,
    ) -> impl Future<Output = Result<VCard, ConnectionError>> + Send;

    fn update_vcard(&self, vcard: VCard)
    -> impl Future<Output = Result<(), ConnectionError>> + Send;
}
