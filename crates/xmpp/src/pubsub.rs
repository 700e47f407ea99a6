use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use rxml::xml_ncname;
use tracing::{debug, info};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::jid::Jid;
use xmpp_parsers::minidom::Element;

use crate::connection::ConnectionManager;
use crate::engine::{NodeSubscription, ProtocolEngine, PubSubItem};
use crate::error::PubSubError;
use crate::stanza::Stanza;

pub const NS_PUBSUB: &str = "http://jabber.org/protocol/pubsub";
pub const NS_ATOM: &str = "http://www.w3.org/2005/Atom";

static NEXT_IQ_ID: AtomicU64 = AtomicU64::new(1);

fn next_iq_id() -> String {
    let sequence = NEXT_IQ_ID.fetch_add(1, Ordering::Relaxed);
    format!("parley-pubsub-{sequence}")
}

/// Publish/subscribe operations against one service, over the session's
/// connection.
pub struct PubSubSession<E>
where
    E: ProtocolEngine,
{
    service: Jid,
    connection: Arc<ConnectionManager<E>>,
}

impl<E> PubSubSession<E>
where
    E: ProtocolEngine,
{
    pub fn new(service: Jid, connection: Arc<ConnectionManager<E>>) -> Self {
        Self {
            service,
            connection,
        }
    }

    pub fn service(&self) -> &Jid {
        &self.service
    }

    pub async fn subscribe_to(&self, node: &str) -> Result<(), PubSubError> {
        let engine = self.connection.engine().await?;
        engine.subscribe_to(&self.service, node).await?;
        info!(service = %self.service, node, "Subscribed to node");
        Ok(())
    }

    pub async fn create_node(&self, node: &str) -> Result<(), PubSubError> {
        let engine = self.connection.engine().await?;
        engine.create_node(&self.service, node).await?;
        Ok(())
    }

    pub async fn delete_node(&self, node: &str) -> Result<(), PubSubError> {
        let engine = self.connection.engine().await?;
        engine.delete_node(&self.service, node).await?;
        Ok(())
    }

    pub async fn publish_item(&self, node: &str, item: PubSubItem) -> Result<(), PubSubError> {
        let engine = self.connection.engine().await?;
        engine.publish_item_to(&self.service, node, item).await?;
        Ok(())
    }

    /// Every subscription this account holds at the service.
    pub async fn subscriptions(&self) -> Result<Vec<NodeSubscription>, PubSubError> {
        let engine = self.connection.engine().await?;
        Ok(engine.subscriptions_from_all_nodes(&self.service).await?)
    }

    /// Drop every subscription to `node`, one IQ per subid.
    ///
    /// Some services refuse an unsubscribe without a subid, so the subids are
    /// looked up first. Each IQ's reply is awaited before the next is sent.
    pub async fn unsubscribe_from(&self, node: &str) -> Result<(), PubSubError> {
        let subids = self.subids_for(node).await?;
        if subids.is_empty() {
            debug!(service = %self.service, node, "No subscriptions to drop");
            return Ok(());
        }

        let own_jid = self.connection.config().jid.clone();
        for subid in subids {
            let unsubscribe = Element::builder("unsubscribe", NS_PUBSUB)
                .attr(xml_ncname!("node").to_ncname(), node)
                .attr(xml_ncname!("jid").to_ncname(), own_jid.to_string())
                .attr(xml_ncname!("subid").to_ncname(), subid.as_str())
                .build();
            let iq = Iq::Set {
                from: Some(own_jid.clone()),
                to: Some(self.service.clone()),
                id: next_iq_id(),
                payload: Element::builder("pubsub", NS_PUBSUB)
                    .append(unsubscribe)
                    .build(),
            };

            let reply = self.connection.send_with_reply(Stanza::from(iq)).await?;
            let accepted = matches!(&reply, Stanza::Iq(iq) if matches!(**iq, Iq::Result { .. }));
            if !accepted {
                return Err(PubSubError::IqRejected {
                    node: node.to_string(),
                    subid,
                });
            }
            debug!(service = %self.service, node, subid = %subid, "Unsubscribed");
        }
        Ok(())
    }

    async fn subids_for(&self, node: &str) -> Result<Vec<String>, PubSubError> {
        Ok(self
            .subscriptions()
            .await?
            .into_iter()
            .filter(|subscription| subscription.node == node)
            .filter_map(|subscription| subscription.subid)
            .collect())
    }

    /// Publish an item holding a single `<value/>` with `text`.
    pub async fn publish_simple_item(&self, node: &str, text: &str) -> Result<(), PubSubError> {
        let value = Element::builder("value", NS_PUBSUB)
            .append(text.to_string())
            .build();
        self.publish_item(node, PubSubItem::new(value)).await
    }

    /// Publish an Atom entry with a title, body, and publication time.
    pub async fn publish_atom_item(
        &self,
        node: &str,
        title: &str,
        body: &str,
        published: DateTime<Utc>,
    ) -> Result<(), PubSubError> {
        self.publish_item(node, PubSubItem::new(atom_entry(title, body, published)))
            .await
    }

    /// Nodes this account owns at the service.
    pub async fn owned_nodes(&self) -> Result<Vec<String>, PubSubError> {
        Ok(self
            .subscriptions()
            .await?
            .into_iter()
            .filter(|subscription| subscription.affiliation() == Some("owner"))
            .map(|subscription| subscription.node)
            .collect())
    }
}

pub fn atom_entry(title: &str, body: &str, published: DateTime<Utc>) -> Element {
    let text = |name: &str, value: String| Element::builder(name, NS_ATOM).append(value).build();

    Element::builder("entry", NS_ATOM)
        .append(text("title", title.to_string()))
        .append(text("body", body.to_string()))
        .append(text(
            "published",
            published.to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
        .build()
}
