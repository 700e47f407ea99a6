use std::ops::ControlFlow;

use parley_client::xmpp_parsers::minidom::Element;
use parley_client::{
    ClientError, ConnectionState, PresenceShow, PubSubEvent, QueueName, Session, SessionConfig,
    VCard,
};
use parley_core::config::{ConfigError, load_config_from_str};
use parley_test_support::{MockEngine, MockServer, fixtures};
use parley_xmpp::PubSubError;
use parley_xmpp::vcard::PHOTO_BINVAL;

async fn started(jid: &str) -> Session<MockEngine> {
    Session::connect(SessionConfig::new(jid, "secret"))
        .await
        .unwrap()
}

fn pubsub_event() -> PubSubEvent {
    PubSubEvent {
        from: Some("pubsub.example.com".parse().unwrap()),
        payload: Element::builder("event", "http://jabber.org/protocol/pubsub#event").build(),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn start_announces_presence_and_registers_handler() {
    let server = MockServer::register("start@example.com");
    let session = started("start@example.com").await;

    assert!(session.is_connected());
    assert_eq!(server.connect_calls(), 1);
    assert_eq!(server.handler_registrations(), 1);
    let presences = server.sent_presences();
    assert_eq!(presences.len(), 1);
    assert_eq!(
        presences[0].statuses.get("").map(String::as_str),
        Some("Available")
    );

    session.shutdown().await;
    assert!(!session.is_connected());
    assert_eq!(
        session.connection_state(),
        ConnectionState::Disconnected { explicit: true }
    );
}

#[tokio::test(flavor = "current_thread")]
async fn inbound_traffic_is_classified_into_queues() {
    let server = MockServer::register("inbound@example.com");
    let session = started("inbound@example.com").await;

    server.inject(fixtures::parsed_stanza("message-chat.xml"));
    server.inject(fixtures::parsed_stanza("message-composing.xml"));
    server.inject(fixtures::parsed_stanza("presence-away.xml"));
    server.inject(fixtures::parsed_stanza("presence-away.xml"));
    server.inject(fixtures::parsed_stanza("presence-subscribed.xml"));

    assert!(session.has_received_messages());
    assert_eq!(session.received_messages().len(), 1);
    assert!(!session.has_received_messages());

    let updates = session.presence_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].jid.to_string(), "alice@example.com");
    assert_eq!(updates[0].presence, PresenceShow::Away);
    assert_eq!(updates[0].status.as_deref(), Some("lunch"));

    assert_eq!(session.new_subscriptions().len(), 1);
    assert!(!session.has_subscription_requests());
}

#[tokio::test(flavor = "current_thread")]
async fn subscription_requests_are_accepted_or_queued() {
    let server = MockServer::register("requests@example.com");
    let session = started("requests@example.com").await;
    assert!(session.accept_subscriptions());

    server.inject(fixtures::parsed_stanza("presence-subscribe.xml"));
    assert_eq!(server.accepted_subscriptions().len(), 1);
    assert!(!session.has_subscription_requests());

    session.set_accept_subscriptions(false);
    server.inject(fixtures::parsed_stanza("presence-subscribe.xml"));
    assert_eq!(server.accepted_subscriptions().len(), 1);

    let requests = session.subscription_requests();
    assert_eq!(requests.len(), 1);
    let from = requests[0].presence.from.as_ref().unwrap().to_string();
    assert_eq!(from, "carol@example.com");

    session.approve_subscription(&from).await.unwrap();
    let accepted: Vec<String> = server
        .accepted_subscriptions()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(accepted, ["carol@example.com", "carol@example.com"]);
}

#[tokio::test(flavor = "current_thread")]
async fn iq_stanzas_are_captured_only_on_request() {
    let server = MockServer::register("iq-capture@example.com");
    let session = started("iq-capture@example.com").await;
    assert!(!session.captures_iq_stanzas());

    server.inject(fixtures::parsed_stanza("iq-ping.xml"));
    assert!(!session.has_iq_stanzas());

    session.capture_iq_stanzas(true);
    server.inject(fixtures::parsed_stanza("iq-ping.xml"));
    assert_eq!(session.iq_stanzas().len(), 1);
    assert_eq!(session.queue_len(QueueName::ReceivedMessages), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn callback_drain_can_stop_early() {
    let server = MockServer::register("drain-with@example.com");
    let session = started("drain-with@example.com").await;
    for _ in 0..3 {
        server.inject(fixtures::parsed_stanza("message-chat.xml"));
    }

    let mut seen = 0;
    let handed = session.received_messages_with(|_| {
        seen += 1;
        if seen == 2 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    assert_eq!(handed, 2);
    assert_eq!(session.queue_len(QueueName::ReceivedMessages), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn default_pubsub_service_is_configured_at_start() {
    let server = MockServer::register("pubsub-default@example.com");
    let session = started("pubsub-default@example.com").await;

    assert!(session.has_pubsub());
    assert_eq!(
        session.pubsub().unwrap().service().to_string(),
        "pubsub.example.com"
    );
    assert!(matches!(
        session.set_pubsub_service("pubsub.other.example"),
        Err(ClientError::PubSub(PubSubError::AlreadySet(_)))
    ));

    server.inject_pubsub_event(pubsub_event());
    assert_eq!(session.received_events().len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn pubsub_requires_a_service() {
    let server = MockServer::register("pubsub-none@example.com");
    let mut config = SessionConfig::new("pubsub-none@example.com", "secret");
    config.pubsub_enabled = false;
    let session = Session::<MockEngine>::connect(config).await.unwrap();

    assert!(!session.has_pubsub());
    assert!(matches!(
        session.pubsub(),
        Err(ClientError::PubSub(PubSubError::NoPubSubService))
    ));
    server.inject_pubsub_event(pubsub_event());
    assert!(!session.has_received_events());

    session.disconnect().await;
    assert!(matches!(
        session.set_pubsub_service("pubsub.example.com"),
        Err(ClientError::PubSub(PubSubError::NotConnected))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn contact_list_reads_the_roster() {
    let server = MockServer::register("contact-list@example.com");
    server.load_roster(fixtures::roster("basic-roster.toml"));
    let session = started("contact-list@example.com").await;

    let jids: Vec<String> = session
        .contact_list()
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.jid)
        .collect();
    assert_eq!(
        jids,
        [
            "alice@example.com",
            "bob@example.com",
            "carol@example.com",
            "dave@example.com"
        ]
    );
    assert!(session.subscribed_to("bob@example.com").await.unwrap());
    assert!(!session.subscribed_to("carol@example.com").await.unwrap());
}

#[tokio::test(flavor = "current_thread")]
async fn vcard_updates_are_visible_to_get_info() {
    let server = MockServer::register("vcard@example.com");
    let session = started("vcard@example.com").await;
    assert_eq!(session.avatar_hash().await.unwrap(), None);

    let mut vcard = VCard::new();
    vcard.set("FN", "Me");
    vcard.set(PHOTO_BINVAL, "aGVs\nbG8=");
    session.update_info(vcard.clone()).await.unwrap();

    assert_eq!(server.stored_vcard(), Some(vcard.clone()));
    assert_eq!(session.get_info(None).await.unwrap(), vcard);
    assert_eq!(
        session.avatar_hash().await.unwrap().as_deref(),
        Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
    );
}

#[test]
fn session_config_loads_from_fixture() {
    let config = load_config_from_str(&fixtures::config("full-config.toml")).unwrap();
    let session = SessionConfig::from(&config);

    assert_eq!(session.jid, "me@example.com");
    assert_eq!(session.host.as_deref(), Some("xmpp.example.com"));
    assert_eq!(session.presence, Some(PresenceShow::Chat));
    assert!(!session.accept_subscriptions);
    assert_eq!(session.pubsub_service.as_deref(), Some("pubsub.example.com"));
}

#[test]
fn session_config_loads_from_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, fixtures::config("full-config.toml")).unwrap();

    let session = SessionConfig::load_from(&path).unwrap();
    assert_eq!(session.jid, "me@example.com");
    assert_eq!(session.pubsub_service.as_deref(), Some("pubsub.example.com"));
}

#[test]
fn missing_config_file_is_created_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parley").join("config.toml");

    let result = SessionConfig::load_from(&path);

    assert!(matches!(
        result,
        Err(ClientError::Config(ConfigError::MissingRequiredFields { .. }))
    ));
    assert!(path.exists());
}
