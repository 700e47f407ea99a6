use std::str::FromStr;

use xmpp_parsers::chatstates::ChatState as XmppChatState;
use xmpp_parsers::iq::Iq;
use xmpp_parsers::jid::Jid;
use xmpp_parsers::message::{Lang, Message, MessageType as XmppMessageType};
use xmpp_parsers::minidom::Element;
use xmpp_parsers::presence::{Presence, Show, Type as PresenceType};

use parley_core::event::{ChatState, MessageType, PresenceShow};

use crate::error::StanzaError;

pub const NS_CHATSTATES: &str = "http://jabber.org/protocol/chatstates";
pub const NS_VCARD_UPDATE: &str = "vcard-temp:x:update";

#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    Message(Box<Message>),
    Presence(Box<Presence>),
    Iq(Box<Iq>),
}

impl Stanza {
    pub fn parse(raw: &[u8]) -> Result<Self, StanzaError> {
        parse_stanza(raw)
    }

    pub fn to_element(&self) -> Element {
        match self {
            Stanza::Message(message) => (**message).clone().into(),
            Stanza::Presence(presence) => (**presence).clone().into(),
            Stanza::Iq(iq) => (**iq).clone().into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }
}

impl From<Message> for Stanza {
    fn from(value: Message) -> Self {
        Stanza::Message(Box::new(value))
    }
}

impl From<Presence> for Stanza {
    fn from(value: Presence) -> Self {
        Stanza::Presence(Box::new(value))
    }
}

impl From<Iq> for Stanza {
    fn from(value: Iq) -> Self {
        Stanza::Iq(Box::new(value))
    }
}

impl TryFrom<Element> for Stanza {
    type Error = StanzaError;

    fn try_from(element: Element) -> Result<Self, Self::Error> {
        parse_stanza_element(element)
    }
}

impl From<Stanza> for Element {
    fn from(value: Stanza) -> Self {
        match value {
            Stanza::Message(message) => (*message).into(),
            Stanza::Presence(presence) => (*presence).into(),
            Stanza::Iq(iq) => (*iq).into(),
        }
    }
}

pub fn parse_stanza(raw: &[u8]) -> Result<Stanza, StanzaError> {
    let xml = std::str::from_utf8(raw)
        .map_err(|error| StanzaError::ParseFailed(format!("invalid UTF-8 stanza bytes: {error}")))?;
    let trimmed = xml.trim();
    if trimmed.is_empty() {
        return Err(StanzaError::ParseFailed("stanza payload is empty".to_string()));
    }

    let element = Element::from_str(trimmed)
        .map_err(|error| StanzaError::ParseFailed(format!("failed to parse stanza XML: {error}")))?;
    parse_stanza_element(element)
}

fn parse_stanza_element(element: Element) -> Result<Stanza, StanzaError> {
    match element.name() {
        "message" => Message::try_from(element)
            .map(Stanza::from)
            .map_err(|error| {
                StanzaError::ParseFailed(format!("failed to parse <message/> stanza: {error}"))
            }),
        "presence" => Presence::try_from(element)
            .map(Stanza::from)
            .map_err(|error| {
                StanzaError::ParseFailed(format!("failed to parse <presence/> stanza: {error}"))
            }),
        "iq" => Iq::try_from(element).map(Stanza::from).map_err(|error| {
            StanzaError::ParseFailed(format!("failed to parse <iq/> stanza: {error}"))
        }),
        other => Err(StanzaError::ParseFailed(format!(
            "unsupported stanza element <{other}/>"
        ))),
    }
}

pub fn parse_jid(jid: &str) -> Result<Jid, StanzaError> {
    jid.parse::<Jid>()
        .map_err(|error| StanzaError::InvalidJid(format!("'{jid}': {error}")))
}

// ── Presence ──────────────────────────────────────────────────────

fn addressed_presence(type_: PresenceType, to: &Jid) -> Presence {
    let mut presence = Presence::new(type_);
    presence.to = Some(to.clone());
    presence
}

/// Ask `to` for authorization to see their presence.
pub fn subscription_request(to: &Jid) -> Presence {
    addressed_presence(PresenceType::Subscribe, to)
}

pub fn unsubscribe(to: &Jid) -> Presence {
    addressed_presence(PresenceType::Unsubscribe, to)
}

pub fn unsubscribed(to: &Jid) -> Presence {
    addressed_presence(PresenceType::Unsubscribed, to)
}

/// Broadcast presence. `show` of `None` or `Online` is plain availability.
pub fn status_presence(
    show: Option<PresenceShow>,
    status: Option<&str>,
    avatar_hash: Option<&str>,
) -> Presence {
    let mut presence = Presence::new(PresenceType::None);

    match show {
        Some(PresenceShow::Unavailable) => presence.type_ = PresenceType::Unavailable,
        Some(PresenceShow::Chat) => presence.show = Some(Show::Chat),
        Some(PresenceShow::Away) => presence.show = Some(Show::Away),
        Some(PresenceShow::Xa) => presence.show = Some(Show::Xa),
        Some(PresenceShow::Dnd) => presence.show = Some(Show::Dnd),
        Some(PresenceShow::Online) | None => {}
    }

    if let Some(text) = status {
        presence.statuses.insert(Lang::new(), text.to_string());
    }

    if let Some(hash) = avatar_hash {
        let photo = Element::builder("photo", NS_VCARD_UPDATE)
            .append(hash.to_string())
            .build();
        presence
            .payloads
            .push(Element::builder("x", NS_VCARD_UPDATE).append(photo).build());
    }

    presence
}

pub fn presence_show(show: &Show) -> PresenceShow {
    match show {
        Show::Away => PresenceShow::Away,
        Show::Chat => PresenceShow::Chat,
        Show::Dnd => PresenceShow::Dnd,
        Show::Xa => PresenceShow::Xa,
    }
}

/// First status text of a presence, preferring the language-neutral one.
pub fn presence_status(presence: &Presence) -> Option<String> {
    presence
        .statuses
        .get("")
        .or_else(|| presence.statuses.values().next())
        .cloned()
}

// ── Messages ──────────────────────────────────────────────────────

fn xmpp_message_type(message_type: MessageType) -> XmppMessageType {
    match message_type {
        MessageType::Chat => XmppMessageType::Chat,
        MessageType::Normal => XmppMessageType::Normal,
        MessageType::Headline => XmppMessageType::Headline,
        MessageType::Groupchat => XmppMessageType::Groupchat,
        MessageType::Error => XmppMessageType::Error,
    }
}

fn chat_state_element(state: ChatState) -> Element {
    let xmpp_state = match state {
        ChatState::Active => XmppChatState::Active,
        ChatState::Composing => XmppChatState::Composing,
        ChatState::Paused => XmppChatState::Paused,
        ChatState::Inactive => XmppChatState::Inactive,
        ChatState::Gone => XmppChatState::Gone,
    };
    xmpp_state.into()
}

pub fn chat_message(
    to: &Jid,
    body: &str,
    message_type: MessageType,
    chat_state: ChatState,
) -> Message {
    let mut message = Message::new_with_type(xmpp_message_type(message_type), Some(to.clone()));
    message.bodies.insert(Lang::new(), body.to_string());
    message.payloads.push(chat_state_element(chat_state));
    message
}

/// Point a caller-built message at `to`, overriding its type and chat state
/// and keeping everything else.
pub fn readdress(
    mut message: Message,
    to: &Jid,
    message_type: MessageType,
    chat_state: ChatState,
) -> Message {
    message.to = Some(to.clone());
    message.type_ = xmpp_message_type(message_type);
    message.payloads.retain(|payload| payload.ns() != NS_CHATSTATES);
    message.payloads.push(chat_state_element(chat_state));
    message
}

pub fn has_body(message: &Message) -> bool {
    !message.bodies.is_empty()
}

pub fn chat_state_of(message: &Message) -> Option<ChatState> {
    message
        .payloads
        .iter()
        .filter(|payload| payload.ns() == NS_CHATSTATES)
        .find_map(|payload| XmppChatState::try_from(payload.clone()).ok())
        .map(|state| match state {
            XmppChatState::Active => ChatState::Active,
            XmppChatState::Composing => ChatState::Composing,
            XmppChatState::Paused => ChatState::Paused,
            XmppChatState::Inactive => ChatState::Inactive,
            XmppChatState::Gone => ChatState::Gone,
        })
}
