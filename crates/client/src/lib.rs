//! XMPP session layer: a [`Session`] over any [`ProtocolEngine`], with
//! reconnects, typed event queues and deferred delivery to contacts that
//! have not yet accepted our subscription.

pub mod bus;
pub mod error;
pub mod inbound;
pub mod logging;
pub mod outbound;
pub mod session;

pub use bus::{EventQueueBus, SubscriptionNotice};
pub use error::ClientError;
pub use session::{Session, SessionConfig};

pub use parley_core::{ChatState, Config, MessageType, PresenceShow, QueueName, RosterItem, Subscription};
pub use parley_messaging::OutgoingBody;
pub use parley_presence::PresenceUpdate;
pub use parley_roster::Contact;
pub use parley_xmpp::{
    ConnectionState, ProtocolEngine, PubSubEvent, PubSubItem, PubSubSession, VCard, xmpp_parsers,
};
