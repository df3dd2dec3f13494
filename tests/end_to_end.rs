use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pair_chat::auth::TokenAuthenticator;
use pair_chat::delivery::DeliveryService;
use pair_chat::models::UserId;
use pair_chat::registry::ConnectionRegistry;
use pair_chat::store::MemoryStore;
use pair_chat::Server;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "e2e-secret";

fn start() -> (Server, SocketAddr) {
    let delivery = DeliveryService::new(
        ConnectionRegistry::new(),
        Arc::new(MemoryStore::new()),
        Duration::from_secs(1),
    );
    let server = Server::new(delivery, Arc::new(TokenAuthenticator::new(SECRET)));
    let (addr, serving) = warp::serve(server.routes(None)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);
    (server, addr)
}

async fn connect(addr: SocketAddr, user: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws?userId={user}"))
        .await
        .expect("handshake");
    socket
}

/// Reads frames until one carries `event`, skipping everything else.
async fn expect_event(socket: &mut Socket, event: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = socket.next().await.expect("socket closed").expect("socket error");
            let Ok(text) = frame.to_text() else { continue };
            let Ok(value) = serde_json::from_str::<Value>(text) else { continue };
            if value["event"] == event {
                return value["data"].clone();
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {event} event"))
}

async fn wait_online(server: &Server, users: &[&str]) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = server.delivery().registry().snapshot().await;
            if snapshot.len() == users.len() && users.iter().all(|u| snapshot.contains(&UserId::from(*u))) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never settled");
}

#[tokio::test]
async fn offline_message_is_seen_when_receiver_opens_conversation() {
    let (server, addr) = start();
    let routes = server.routes(None);
    let tokens = TokenAuthenticator::new(SECRET);

    let res = warp::test::request()
        .method("POST")
        .path("/api/messages/send/bob")
        .header("token", tokens.issue(&"alice".into()))
        .json(&json!({ "text": "are you there?" }))
        .reply(&routes)
        .await;
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["message"]["delivered"], false);
    assert_eq!(body["message"]["seen"], false);
    let message_id = body["message"]["id"].clone();

    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    wait_online(&server, &["alice", "bob"]).await;

    // Connecting does not backfill delivery.
    let res = warp::test::request()
        .path("/api/messages/bob")
        .header("token", tokens.issue(&"alice".into()))
        .reply(&routes)
        .await;
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["messages"][0]["delivered"], false);

    let res = warp::test::request()
        .path("/api/messages/alice")
        .header("token", tokens.issue(&"bob".into()))
        .reply(&routes)
        .await;
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["messages"][0]["delivered"], true);
    assert_eq!(body["messages"][0]["seen"], true);

    let seen = expect_event(&mut alice, "messagesSeen").await;
    assert_eq!(seen, json!({ "by": "bob", "messageIds": [message_id] }));

    // Nothing left to mark: the socket path is a no-op now.
    bob.send(Message::text(json!({"event": "markAsSeen", "data": {"from": "alice"}}).to_string()))
        .await
        .unwrap();
    bob.send(Message::text(json!({"event": "typing", "data": {"to": "alice"}}).to_string()))
        .await
        .unwrap();
    let typing = expect_event(&mut alice, "typing").await;
    assert_eq!(typing, json!({ "from": "bob" }));
}

#[tokio::test]
async fn live_message_reaches_receiver_and_acks_sender() {
    let (server, addr) = start();
    let routes = server.routes(None);
    let tokens = TokenAuthenticator::new(SECRET);

    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;
    wait_online(&server, &["alice", "bob"]).await;

    let res = warp::test::request()
        .method("POST")
        .path("/api/messages/send/bob")
        .header("token", tokens.issue(&"alice".into()))
        .json(&json!({ "text": "hi bob" }))
        .reply(&routes)
        .await;
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["message"]["delivered"], true);

    let incoming = expect_event(&mut bob, "newMessage").await;
    assert_eq!(incoming["text"], "hi bob");
    assert_eq!(incoming["senderId"], "alice");

    let ack = expect_event(&mut alice, "messageDelivered").await;
    assert_eq!(ack["messageId"], body["message"]["id"]);
}

#[tokio::test]
async fn stale_disconnect_keeps_reconnected_user_online() {
    let (server, addr) = start();
    let mut watcher = connect(addr, "carol").await;
    wait_online(&server, &["carol"]).await;

    let mut first = connect(addr, "bob").await;
    wait_online(&server, &["bob", "carol"]).await;
    let _second = connect(addr, "bob").await;
    // Both connects broadcast; drain them before closing the stale session.
    expect_event(&mut watcher, "getOnlineUsers").await;
    expect_event(&mut watcher, "getOnlineUsers").await;
    expect_event(&mut watcher, "getOnlineUsers").await;

    first.close(None).await.unwrap();
    // The server's reader loop answers the close handshake and unregisters
    // right after, well before a new client can finish its upgrade.
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(_)) = first.next().await {}
    })
    .await
    .expect("close never acknowledged");

    // A removal would have broadcast a set without bob before this join.
    let _dave = connect(addr, "dave").await;
    let online = expect_event(&mut watcher, "getOnlineUsers").await;
    assert_eq!(online, json!(["bob", "carol", "dave"]));

    let snapshot = server.delivery().registry().snapshot().await;
    assert!(snapshot.contains(&UserId::from("bob")));
    assert_eq!(snapshot.len(), 3);
}
