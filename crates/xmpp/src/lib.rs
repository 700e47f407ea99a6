pub mod connection;
pub mod engine;
pub mod error;
pub mod pubsub;
pub mod stanza;
pub mod vcard;

pub use connection::{ConnectionManager, ConnectionState};
pub use engine::{
    ConnectionConfig, InboundHandler, NodeSubscription, ProtocolEngine, PubSubEvent,
    PubSubHelper, PubSubItem, SubscriptionDecision,
};
pub use error::{ConnectionError, PubSubError, StanzaError, VCardError};
pub use pubsub::PubSubSession;
pub use stanza::Stanza;
pub use vcard::VCard;

pub use xmpp_parsers;
