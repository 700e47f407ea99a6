use std::time::Duration;

use parley_client::xmpp_parsers::message::{Message, MessageType as XmppMessageType};
use parley_client::xmpp_parsers::presence::Type as PresenceType;
use parley_client::{
    ChatState, ClientError, ConnectionState, MessageType, QueueName, Session, SessionConfig,
    Subscription,
};
use parley_roster::RosterError;
use parley_test_support::{MockEngine, MockServer, fixtures};
use parley_xmpp::ConnectionError;
use parley_xmpp::stanza::{chat_message, chat_state_of};

fn session(jid: &str) -> Session<MockEngine> {
    Session::new(SessionConfig::new(jid, "secret")).unwrap()
}

fn body(message: &Message) -> Option<&str> {
    message.bodies.get("").map(String::as_str)
}

#[tokio::test(flavor = "current_thread")]
async fn unsubscribed_destinations_get_one_request_each_and_are_deferred() {
    let server = MockServer::register("me@example.com");
    let session = session("me@example.com");

    session
        .deliver(["a@example.com", "b@example.com"], "hi")
        .await
        .unwrap();

    let requests = server.sent_presences_of_type(PresenceType::Subscribe);
    let targets: Vec<String> = requests
        .iter()
        .filter_map(|presence| presence.to.as_ref().map(ToString::to_string))
        .collect();
    assert_eq!(targets, ["a@example.com", "b@example.com"]);
    assert!(server.sent_messages().is_empty());
    assert_eq!(session.queue_len(QueueName::PendingMessages), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn subscribed_destination_is_sent_directly() {
    let server = MockServer::register("deliver-direct@example.com");
    server.load_roster(fixtures::roster("basic-roster.toml"));
    let session = session("deliver-direct@example.com");

    session
        .deliver(["alice@example.com/phone", "bob@example.com"], "hi")
        .await
        .unwrap();

    let sent = server.sent_messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0].to.as_ref().map(ToString::to_string).as_deref(),
        Some("alice@example.com")
    );
    assert_eq!(body(&sent[0]), Some("hi"));
    assert_eq!(sent[0].type_, XmppMessageType::Chat);
    assert_eq!(chat_state_of(&sent[0]), Some(ChatState::Active));
    assert!(server.sent_presences_of_type(PresenceType::Subscribe).is_empty());
    assert_eq!(session.queue_len(QueueName::PendingMessages), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn prebuilt_message_is_readdressed() {
    let server = MockServer::register("deliver-prebuilt@example.com");
    server.set_roster_item("alice@example.com", Subscription::Both);
    let session = session("deliver-prebuilt@example.com");
    let draft = chat_message(
        &"nobody@example.com".parse().unwrap(),
        "draft",
        MessageType::Chat,
        ChatState::Composing,
    );

    session
        .deliver_with(
            ["alice@example.com"],
            draft,
            MessageType::Normal,
            ChatState::Paused,
        )
        .await
        .unwrap();

    let sent = server.sent_messages().remove(0);
    assert_eq!(
        sent.to.as_ref().map(ToString::to_string).as_deref(),
        Some("alice@example.com")
    );
    assert_eq!(sent.type_, XmppMessageType::Normal);
    assert_eq!(body(&sent), Some("draft"));
    assert_eq!(chat_state_of(&sent), Some(ChatState::Paused));
    assert_eq!(sent.payloads.len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn invalid_destination_sends_nothing() {
    let server = MockServer::register("deliver-invalid@example.com");
    let session = session("deliver-invalid@example.com");

    let result = session.deliver(["a@example.com", "@@@"], "hi").await;

    assert!(matches!(
        result,
        Err(ClientError::Roster(RosterError::InvalidJid(_)))
    ));
    assert!(server.sent().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn deliver_deferred_skips_the_authorization_request() {
    let server = MockServer::register("deliver-deferred@example.com");
    let session = session("deliver-deferred@example.com");

    session
        .deliver_deferred("a@example.com", "later", MessageType::Chat)
        .unwrap();

    assert_eq!(session.queue_len(QueueName::PendingMessages), 1);
    assert!(server.sent().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn worker_delivers_once_contact_subscribes() {
    let server = MockServer::register("worker-flush@example.com");
    let session = Session::<MockEngine>::connect(SessionConfig::new(
        "worker-flush@example.com",
        "secret",
    ))
    .await
    .unwrap();
    server.clear_sent();

    session.deliver(["a@example.com"], "hello").await.unwrap();
    session.deliver(["b@example.com"], "hello").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(server.sent_messages().is_empty());
    assert_eq!(session.queue_len(QueueName::PendingMessages), 2);

    server.set_roster_item("a@example.com", Subscription::To);
    tokio::time::sleep(Duration::from_secs(61)).await;

    let sent = server.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].to.as_ref().map(ToString::to_string).as_deref(),
        Some("a@example.com")
    );
    assert_eq!(body(&sent[0]), Some("hello"));
    assert_eq!(session.queue_len(QueueName::PendingMessages), 1);

    session.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dropping_the_session_stops_the_worker() {
    let server = MockServer::register("worker-drop@example.com");
    let session = Session::<MockEngine>::connect(SessionConfig::new(
        "worker-drop@example.com",
        "secret",
    ))
    .await
    .unwrap();

    session.deliver(["a@example.com"], "hello").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(session);

    server.set_roster_item("a@example.com", Subscription::To);
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert!(server.sent_messages().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn add_only_asks_unsubscribed_contacts() {
    let server = MockServer::register("roster-add@example.com");
    server.load_roster(fixtures::roster("basic-roster.toml"));
    let session = session("roster-add@example.com");

    session
        .add(["alice@example.com", "carol@example.com", "dave@example.com"])
        .await
        .unwrap();

    let targets: Vec<String> = server
        .sent_presences_of_type(PresenceType::Subscribe)
        .iter()
        .filter_map(|presence| presence.to.as_ref().map(ToString::to_string))
        .collect();
    assert_eq!(targets, ["carol@example.com", "dave@example.com"]);
}

#[tokio::test(flavor = "current_thread")]
async fn remove_unsubscribes_both_ways() {
    let server = MockServer::register("roster-remove@example.com");
    let session = session("roster-remove@example.com");

    session.remove(["alice@example.com"]).await.unwrap();

    let types: Vec<PresenceType> = server
        .sent_presences()
        .iter()
        .map(|presence| presence.type_.clone())
        .collect();
    assert_eq!(types, [PresenceType::Unsubscribe, PresenceType::Unsubscribed]);
}

#[tokio::test(flavor = "current_thread")]
async fn explicit_disconnect_blocks_delivery_until_reconnect() {
    let server = MockServer::register("deliver-disconnected@example.com");
    server.set_roster_item("alice@example.com", Subscription::Both);
    let session = session("deliver-disconnected@example.com");

    session.disconnect().await;
    assert_eq!(
        session.connection_state(),
        ConnectionState::Disconnected { explicit: true }
    );
    let result = session.deliver(["alice@example.com"], "hi").await;
    assert!(matches!(
        result,
        Err(ClientError::Roster(RosterError::Connection(
            ConnectionError::Disabled
        )))
    ));

    session.reconnect().await.unwrap();
    session.deliver(["alice@example.com"], "hi").await.unwrap();
    assert_eq!(server.sent_messages().len(), 1);
}
