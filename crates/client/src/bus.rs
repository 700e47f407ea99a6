use std::sync::Arc;

use parley_core::event::RosterItem;
use parley_core::queue::{EventQueue, QueueName};
use parley_messaging::PendingMessage;
use parley_presence::PresenceUpdate;
use parley_xmpp::PubSubEvent;
use parley_xmpp::xmpp_parsers::iq::Iq;
use parley_xmpp::xmpp_parsers::message::Message;
use parley_xmpp::xmpp_parsers::presence::Presence;

/// A subscription presence with the sender's roster entry, if known.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionNotice {
    pub item: Option<RosterItem>,
    pub presence: Presence,
}

/// The session's fixed set of queues, all created up front.
#[derive(Debug)]
pub struct EventQueueBus {
    pub received_messages: EventQueue<Message>,
    pub presence_updates: EventQueue<PresenceUpdate>,
    pub new_subscriptions: EventQueue<SubscriptionNotice>,
    pub subscription_requests: EventQueue<SubscriptionNotice>,
    pub iq_stanzas: EventQueue<Iq>,
    pub received_events: EventQueue<PubSubEvent>,
    /// Shared with the deferred delivery worker.
    pub pending_messages: Arc<EventQueue<PendingMessage>>,
}

impl EventQueueBus {
    /// Drain cap used by the session's queue accessors.
    pub const DEFAULT_DRAIN: usize = 100;

    pub fn new() -> Self {
        Self {
            received_messages: EventQueue::new(QueueName::ReceivedMessages),
            presence_updates: EventQueue::new(QueueName::PresenceUpdates),
            new_subscriptions: EventQueue::new(QueueName::NewSubscriptions),
            subscription_requests: EventQueue::new(QueueName::SubscriptionRequests),
            iq_stanzas: EventQueue::new(QueueName::IqStanzas),
            received_events: EventQueue::new(QueueName::ReceivedEvents),
            pending_messages: Arc::new(EventQueue::new(QueueName::PendingMessages)),
        }
    }

    pub fn len(&self, name: QueueName) -> usize {
        match name {
            QueueName::ReceivedMessages => self.received_messages.len(),
            QueueName::PresenceUpdates => self.presence_updates.len(),
            QueueName::NewSubscriptions => self.new_subscriptions.len(),
            QueueName::SubscriptionRequests => self.subscription_requests.len(),
            QueueName::IqStanzas => self.iq_stanzas.len(),
            QueueName::ReceivedEvents => self.received_events.len(),
            QueueName::PendingMessages => self.pending_messages.len(),
        }
    }

    pub fn is_empty(&self, name: QueueName) -> bool {
        self.len(name) == 0
    }
}

impl Default for EventQueueBus {
    fn default() -> Self {
        Self::new()
    }
}
