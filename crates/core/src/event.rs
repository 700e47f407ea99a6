use serde::{Deserialize, Serialize};

/// A single entry in the XMPP roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterItem {
    /// The contact's bare JID (e.g., "alice@example.com")
    pub jid: String,

    /// Display name set by the user, if any
    pub name: Option<String>,

    /// Roster subscription state
    pub subscription: Subscription,

    /// User-defined groups this contact belongs to
    pub groups: Vec<String>,
}

impl RosterItem {
    pub fn new(jid: impl Into<String>, subscription: Subscription) -> Self {
        Self {
            jid: jid.into(),
            name: None,
            subscription,
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Subscription {
    #[default]
    None,
    To,
    From,
    Both,
}

impl Subscription {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subscription::None => "none",
            Subscription::To => "to",
            Subscription::From => "from",
            Subscription::Both => "both",
        }
    }

    /// True when we receive the contact's presence, i.e. we may message them.
    pub fn is_subscribed_to(&self) -> bool {
        matches!(self, Subscription::To | Subscription::Both)
    }
}

impl std::str::FromStr for Subscription {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "to" => Subscription::To,
            "from" => Subscription::From,
            "both" => Subscription::Both,
            _ => Subscription::None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    #[default]
    Chat,
    Groupchat,
    Normal,
    Headline,
    Error,
}

/// Presence kind reported for a contact: the `<show/>` value, plain
/// availability, or unavailability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresenceShow {
    /// Available (no <show/> element)
    Online,
    /// Free for chat
    Chat,
    /// Away
    Away,
    /// Extended away
    Xa,
    /// Do not disturb
    Dnd,
    /// Unavailable (offline)
    Unavailable,
}

impl PresenceShow {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceShow::Online => "online",
            PresenceShow::Chat => "chat",
            PresenceShow::Away => "away",
            PresenceShow::Xa => "xa",
            PresenceShow::Dnd => "dnd",
            PresenceShow::Unavailable => "unavailable",
        }
    }

    /// Parse a `<show/>` value. Only the four RFC 6121 values are accepted.
    pub fn from_show(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(PresenceShow::Chat),
            "away" => Some(PresenceShow::Away),
            "xa" => Some(PresenceShow::Xa),
            "dnd" => Some(PresenceShow::Dnd),
            _ => None,
        }
    }
}

impl std::fmt::Display for PresenceShow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// XEP-0085 Chat State Notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatState {
    #[default]
    Active,
    Composing,
    Paused,
    Inactive,
    Gone,
}
