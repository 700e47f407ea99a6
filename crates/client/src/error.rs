use parley_core::config::ConfigError;
use parley_roster::RosterError;
use parley_xmpp::{ConnectionError, PubSubError, StanzaError, VCardError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    VCard(#[from] VCardError),

    #[error(transparent)]
    Stanza(#[from] StanzaError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
