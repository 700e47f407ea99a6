//! Deliver, add and remove.

use std::sync::Arc;

use tracing::{debug, info};

use parley_core::event::{ChatState, MessageType};
use parley_core::queue::EventQueue;
use parley_messaging::{DeferredDelivery, OutgoingBody, PendingMessage};
use parley_roster::{Contact, ContactDirectory};
use parley_xmpp::stanza::{self, Stanza};
use parley_xmpp::xmpp_parsers::jid::Jid;
use parley_xmpp::{ConnectionManager, ProtocolEngine};

use crate::error::ClientError;

/// Sends messages and subscription presences on behalf of a session.
pub struct Courier<E>
where
    E: ProtocolEngine,
{
    connection: Arc<ConnectionManager<E>>,
    contacts: Arc<ContactDirectory>,
    pending: Arc<EventQueue<PendingMessage>>,
}

impl<E> Courier<E>
where
    E: ProtocolEngine,
{
    pub fn new(
        connection: Arc<ConnectionManager<E>>,
        contacts: Arc<ContactDirectory>,
        pending: Arc<EventQueue<PendingMessage>>,
    ) -> Self {
        Self {
            connection,
            contacts,
            pending,
        }
    }

    /// Send `body` to every contact. Unsubscribed contacts get an
    /// authorization request and the message is queued until they accept.
    pub async fn deliver(
        &self,
        contacts: &[Arc<Contact>],
        body: &OutgoingBody,
        message_type: MessageType,
        chat_state: ChatState,
    ) -> Result<(), ClientError> {
        for contact in contacts {
            self.deliver_to(contact, body.clone(), message_type, chat_state)
                .await?;
        }
        Ok(())
    }

    async fn deliver_to(
        &self,
        contact: &Contact,
        body: OutgoingBody,
        message_type: MessageType,
        chat_state: ChatState,
    ) -> Result<(), ClientError> {
        let to = contact.address();

        if !contact.is_subscribed(self.connection.as_ref()).await? {
            self.request_authorization(&to).await?;
            self.deliver_deferred(to, body, message_type);
            return Ok(());
        }

        let message = match body {
            OutgoingBody::Text(text) => stanza::chat_message(&to, &text, message_type, chat_state),
            OutgoingBody::Stanza(message) => {
                stanza::readdress(*message, &to, message_type, chat_state)
            }
        };
        self.connection.send(Stanza::from(message)).await?;
        debug!(to = %to, "Message sent");
        Ok(())
    }

    /// Queue a message for the deferred delivery worker. No authorization
    /// request is sent.
    pub fn deliver_deferred(&self, to: Jid, body: OutgoingBody, message_type: MessageType) {
        debug!(to = %to, "Deferring message until subscribed");
        self.pending
            .push(PendingMessage::new(to, body, message_type));
    }

    /// Ask every contact we are not yet subscribed to for authorization.
    pub async fn add(&self, contacts: &[Arc<Contact>]) -> Result<(), ClientError> {
        for contact in contacts {
            if contact.is_subscribed(self.connection.as_ref()).await? {
                debug!(jid = %contact.jid(), "Already subscribed");
                continue;
            }
            self.request_authorization(&contact.address()).await?;
        }
        Ok(())
    }

    /// Cancel our subscription to each contact and theirs to us.
    pub async fn remove(&self, contacts: &[Arc<Contact>]) -> Result<(), ClientError> {
        for contact in contacts {
            let to = contact.address();
            self.connection
                .send(Stanza::from(stanza::unsubscribe(&to)))
                .await?;
            self.connection
                .send(Stanza::from(stanza::unsubscribed(&to)))
                .await?;
            info!(jid = %to, "Removed contact");
        }
        Ok(())
    }

    async fn request_authorization(&self, to: &Jid) -> Result<(), ClientError> {
        info!(jid = %to, "Requesting subscription");
        self.connection
            .send(Stanza::from(stanza::subscription_request(to)))
            .await?;
        Ok(())
    }
}

impl<E> DeferredDelivery for Courier<E>
where
    E: ProtocolEngine,
{
    type Error = ClientError;

    async fn is_subscribed(&self, to: &Jid) -> Result<bool, ClientError> {
        let contact = self.contacts.resolve_jid(to);
        Ok(contact.is_subscribed(self.connection.as_ref()).await?)
    }

    async fn deliver(&self, message: PendingMessage) -> Result<(), ClientError> {
        let contact = self.contacts.resolve_jid(&message.to);
        self.deliver_to(
            &contact,
            message.body,
            message.message_type,
            ChatState::default(),
        )
        .await
    }
}
