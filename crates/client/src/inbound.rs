//! Classification of engine callbacks into the session's queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use parley_core::event::RosterItem;
use parley_presence::PresenceTracker;
use parley_roster::ContactDirectory;
use parley_xmpp::stanza::{chat_state_of, has_body};
use parley_xmpp::xmpp_parsers::iq::Iq;
use parley_xmpp::xmpp_parsers::message::Message;
use parley_xmpp::xmpp_parsers::presence::{Presence, Type as PresenceType};
use parley_xmpp::{InboundHandler, PubSubEvent, SubscriptionDecision};

use crate::bus::{EventQueueBus, SubscriptionNotice};

/// The one observer registered with every engine a session connects.
pub struct InboundRouter {
    bus: Arc<EventQueueBus>,
    contacts: Arc<ContactDirectory>,
    presence: PresenceTracker,
    capture_iq: Mutex<bool>,
    accept_subscriptions: AtomicBool,
    pubsub_events: AtomicBool,
}

impl InboundRouter {
    pub fn new(
        bus: Arc<EventQueueBus>,
        contacts: Arc<ContactDirectory>,
        accept_subscriptions: bool,
    ) -> Self {
        Self {
            bus,
            contacts,
            presence: PresenceTracker::new(),
            capture_iq: Mutex::new(false),
            accept_subscriptions: AtomicBool::new(accept_subscriptions),
            pubsub_events: AtomicBool::new(false),
        }
    }

    pub fn presence_tracker(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn set_capture_iq(&self, enabled: bool) {
        *self
            .capture_iq
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = enabled;
    }

    pub fn captures_iq(&self) -> bool {
        *self
            .capture_iq
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_accept_subscriptions(&self, accept: bool) {
        self.accept_subscriptions.store(accept, Ordering::SeqCst);
    }

    pub fn accepts_subscriptions(&self) -> bool {
        self.accept_subscriptions.load(Ordering::SeqCst)
    }

    pub fn enable_pubsub_events(&self) {
        self.pubsub_events.store(true, Ordering::SeqCst);
    }

    fn notice(item: Option<RosterItem>, presence: Presence) -> SubscriptionNotice {
        SubscriptionNotice { item, presence }
    }
}

impl InboundHandler for InboundRouter {
    fn on_message(&self, message: Message) {
        if let (Some(from), Some(state)) = (message.from.as_ref(), chat_state_of(&message)) {
            let contact = self.contacts.resolve_jid(from);
            if contact.set_chat_state(state) {
                debug!(from = %contact.jid(), state = ?state, "Chat state changed");
            }
        }

        if has_body(&message) {
            self.bus.received_messages.push(message);
        } else {
            debug!("Dropping message without body");
        }
    }

    fn on_presence(&self, presence: Presence) {
        self.presence
            .observe(&presence, |update| self.bus.presence_updates.push(update));
    }

    fn on_subscription(&self, item: Option<RosterItem>, presence: Presence) {
        if presence.type_ != PresenceType::Subscribed {
            debug!(type_ = ?presence.type_, "Ignoring subscription event");
            return;
        }
        self.bus
            .new_subscriptions
            .push(Self::notice(item, presence));
    }

    fn on_subscription_request(
        &self,
        item: Option<RosterItem>,
        presence: Presence,
    ) -> SubscriptionDecision {
        if self.accepts_subscriptions() {
            info!(from = ?presence.from.as_ref().map(ToString::to_string), "Accepting subscription request");
            return SubscriptionDecision::Accept;
        }
        self.bus
            .subscription_requests
            .push(Self::notice(item, presence));
        SubscriptionDecision::Defer
    }

    fn on_iq(&self, iq: Iq) {
        let capture = self
            .capture_iq
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *capture {
            self.bus.iq_stanzas.push(iq);
        }
    }

    fn on_pubsub_event(&self, event: PubSubEvent) {
        if self.pubsub_events.load(Ordering::SeqCst) {
            self.bus.received_events.push(event);
        } else {
            debug!("Ignoring pubsub event; no service configured");
        }
    }
}
