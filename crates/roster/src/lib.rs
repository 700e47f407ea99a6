use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use parley_core::event::{ChatState, RosterItem, Subscription};
use parley_xmpp::xmpp_parsers::jid::{BareJid, Jid};
use parley_xmpp::{ConnectionError, ConnectionManager, ProtocolEngine};

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("invalid JID: {0}")]
    InvalidJid(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Live view of the server-side roster.
pub trait RosterLookup: Send + Sync {
    fn find_item(
        &self,
        jid: &BareJid,
    ) -> impl Future<Output = Result<Option<RosterItem>, ConnectionError>> + Send;
}

impl<E> RosterLookup for ConnectionManager<E>
where
    E: ProtocolEngine,
{
    async fn find_item(&self, jid: &BareJid) -> Result<Option<RosterItem>, ConnectionError> {
        self.engine().await?.find_item(jid).await
    }
}

/// Someone we talk to, keyed by bare JID.
///
/// Subscription state is not stored here; it is read from the roster on
/// every query so it can never go stale.
#[derive(Debug)]
pub struct Contact {
    jid: BareJid,
    chat_state: RwLock<Option<ChatState>>,
}

impl Contact {
    fn new(jid: BareJid) -> Self {
        Self {
            jid,
            chat_state: RwLock::new(None),
        }
    }

    pub fn jid(&self) -> &BareJid {
        &self.jid
    }

    /// Address for outgoing stanzas.
    pub fn address(&self) -> Jid {
        Jid::from(self.jid.clone())
    }

    /// Last chat state this contact sent us.
    pub fn chat_state(&self) -> Option<ChatState> {
        *self
            .chat_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `state`; returns whether it differed from the previous one.
    pub fn set_chat_state(&self, state: ChatState) -> bool {
        let mut current = self
            .chat_state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *current == Some(state) {
            return false;
        }
        *current = Some(state);
        true
    }

    /// Roster subscription, `None` when the contact is not in the roster.
    pub async fn subscription<R>(&self, roster: &R) -> Result<Subscription, RosterError>
    where
        R: RosterLookup + ?Sized,
    {
        Ok(roster
            .find_item(&self.jid)
            .await?
            .map(|item| item.subscription)
            .unwrap_or_default())
    }

    /// Whether we receive this contact's presence and may message them.
    pub async fn is_subscribed<R>(&self, roster: &R) -> Result<bool, RosterError>
    where
        R: RosterLookup + ?Sized,
    {
        Ok(self.subscription(roster).await?.is_subscribed_to())
    }
}

/// Process-lifetime cache of [`Contact`]s. Contacts are created on first
/// reference and never removed.
#[derive(Debug, Default)]
pub struct ContactDirectory {
    contacts: RwLock<HashMap<BareJid, Arc<Contact>>>,
}

impl ContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve_jid(&self, jid: &Jid) -> Arc<Contact> {
        let bare = jid.to_bare();
        if let Some(contact) = self
            .contacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&bare)
        {
            return Arc::clone(contact);
        }

        let mut contacts = self
            .contacts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(contacts.entry(bare).or_insert_with_key(|bare| {
            debug!(jid = %bare, "New contact");
            Arc::new(Contact::new(bare.clone()))
        }))
    }

    /// Resolve one address, bare or full, to its contact.
    pub fn resolve_one(&self, identifier: &str) -> Result<Arc<Contact>, RosterError> {
        let jid: Jid = identifier
            .parse()
            .map_err(|error| RosterError::InvalidJid(format!("'{identifier}': {error}")))?;
        Ok(self.resolve_jid(&jid))
    }

    /// Resolve several addresses, preserving order. Fails on the first
    /// invalid one without creating any contact past it.
    pub fn resolve_many<I, S>(&self, identifiers: I) -> Result<Vec<Arc<Contact>>, RosterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        identifiers
            .into_iter()
            .map(|identifier| self.resolve_one(identifier.as_ref()))
            .collect()
    }

    pub fn contacts(&self) -> Vec<Arc<Contact>> {
        self.contacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub async fn is_subscribed_to<R>(&self, identifier: &str, roster: &R) -> Result<bool, RosterError>
    where
        R: RosterLookup + ?Sized,
    {
        self.resolve_one(identifier)?.is_subscribed(roster).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct StaticRoster {
        items: HashMap<BareJid, RosterItem>,
    }

    impl StaticRoster {
        fn with(mut self, jid: &str, subscription: Subscription) -> Self {
            let bare: BareJid = jid.parse().unwrap();
            self.items
                .insert(bare, RosterItem::new(jid, subscription));
            self
        }
    }

    impl RosterLookup for StaticRoster {
        async fn find_item(&self, jid: &BareJid) -> Result<Option<RosterItem>, ConnectionError> {
            Ok(self.items.get(jid).cloned())
        }
    }

    #[test]
    fn bare_and_full_forms_resolve_to_the_same_contact() {
        let directory = ContactDirectory::new();
        let bare = directory.resolve_one("alice@example.com").unwrap();
        let full = directory.resolve_one("alice@example.com/phone").unwrap();

        assert!(Arc::ptr_eq(&bare, &full));
        assert_eq!(full.jid().to_string(), "alice@example.com");
        assert_eq!(directory.contacts().len(), 1);
    }

    #[test]
    fn resolve_many_preserves_order() {
        let directory = ContactDirectory::new();
        let contacts = directory
            .resolve_many(["b@example.com", "a@example.com", "b@example.com/x"])
            .unwrap();

        let jids: Vec<String> = contacts.iter().map(|c| c.jid().to_string()).collect();
        assert_eq!(jids, ["b@example.com", "a@example.com", "b@example.com"]);
        assert!(Arc::ptr_eq(&contacts[0], &contacts[2]));
        assert_eq!(directory.contacts().len(), 2);
    }

    #[test]
    fn invalid_identifier_is_rejected() {
        let directory = ContactDirectory::new();
        assert!(matches!(
            directory.resolve_one("@@@"),
            Err(RosterError::InvalidJid(_))
        ));
        assert!(directory.contacts().is_empty());
    }

    #[test]
    fn chat_state_change_is_reported_once() {
        let directory = ContactDirectory::new();
        let contact = directory.resolve_one("alice@example.com").unwrap();

        assert_eq!(contact.chat_state(), None);
        assert!(contact.set_chat_state(ChatState::Composing));
        assert!(!contact.set_chat_state(ChatState::Composing));
        assert!(contact.set_chat_state(ChatState::Paused));
        assert_eq!(contact.chat_state(), Some(ChatState::Paused));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn only_to_and_both_are_subscribed() {
        let roster = StaticRoster::default()
            .with("to@example.com", Subscription::To)
            .with("both@example.com", Subscription::Both)
            .with("from@example.com", Subscription::From)
            .with("none@example.com", Subscription::None);
        let directory = ContactDirectory::new();

        assert!(directory.is_subscribed_to("to@example.com", &roster).await.unwrap());
        assert!(directory.is_subscribed_to("both@example.com/r", &roster).await.unwrap());
        assert!(!directory.is_subscribed_to("from@example.com", &roster).await.unwrap());
        assert!(!directory.is_subscribed_to("none@example.com", &roster).await.unwrap());
        assert!(!directory.is_subscribed_to("stranger@example.com", &roster).await.unwrap());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn subscription_is_read_live() {
        let directory = ContactDirectory::new();
        let contact = directory.resolve_one("bob@example.com").unwrap();

        let before = StaticRoster::default();
        assert_eq!(contact.subscription(&before).await.unwrap(), Subscription::None);

        let after = StaticRoster::default().with("bob@example.com", Subscription::Both);
        assert_eq!(contact.subscription(&after).await.unwrap(), Subscription::Both);
    }
}
