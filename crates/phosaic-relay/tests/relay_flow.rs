//! End-to-end signaling through a relay bound to an ephemeral port.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use phosaic_proto::{Role, SessionId};
use phosaic_relay::registry::{IdGenerator, IdentityRegistry, RegistryError};
use phosaic_relay::{RelayServer, ServerConfig};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn scripted(ids: &[&str]) -> IdGenerator {
    let queue = Mutex::new(ids.iter().map(|s| SessionId::from(*s)).collect::<VecDeque<_>>());
    Arc::new(move || queue.lock().unwrap().pop_front().ok_or(RegistryError::Exhausted(0)))
}

async fn start_relay(ids: &[&str]) -> (Arc<RelayServer>, SocketAddr) {
    let registry = Arc::new(IdentityRegistry::with_generator(scripted(ids)));
    let server = Arc::new(RelayServer::with_registry(ServerConfig::default(), registry).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve(listener).await });

    (server, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
    ws
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {:?}", next);
}

async fn wait_for_count(server: &RelayServer, role: Role, expected: usize) {
    for _ in 0..100 {
        if server.router().registry().count(role) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} count never reached {}", role, expected);
}

async fn pair(addr: SocketAddr) -> (Client, Client) {
    let mut sub = connect(addr).await;
    send(&mut sub, json!({"type": "register-subordinate", "width": 1280, "height": 720})).await;
    assert_eq!(recv(&mut sub).await, json!({"type": "registered", "id": "abc123"}));

    let mut coord = connect(addr).await;
    send(&mut coord, json!({"type": "register-coordinator", "id": "abc123"})).await;
    assert_eq!(recv(&mut coord).await, json!({"type": "registered", "id": "coord1"}));

    (sub, coord)
}

#[tokio::test]
async fn offer_answer_and_candidates_flow() {
    let (server, addr) = start_relay(&["abc123", "coord1"]).await;
    let (mut sub, mut coord) = pair(addr).await;

    send(&mut coord, json!({
        "type": "offer",
        "targetId": "abc123",
        "sourceId": "coord1",
        "offer": {"type": "offer", "sdp": "v=0\r\n"}
    }))
    .await;
    let offer = recv(&mut sub).await;
    assert_eq!(offer["sourceId"], "coord1");
    assert_eq!(offer["offer"]["sdp"], "v=0\r\n");

    send(&mut sub, json!({
        "type": "answer",
        "targetId": "coord1",
        "sourceId": "abc123",
        "answer": {"type": "answer", "sdp": "v=0\r\n"}
    }))
    .await;
    let answer = recv(&mut coord).await;
    assert_eq!(answer["sourceId"], "abc123");
    assert_eq!(answer["width"], 1280);
    assert_eq!(answer["height"], 720);

    for n in 1..=2 {
        send(&mut coord, json!({"type": "ice-candidate", "targetId": "abc123", "candidate": {"candidate": n}})).await;
    }
    assert_eq!(recv(&mut sub).await["candidate"]["candidate"], 1);
    assert_eq!(recv(&mut sub).await["candidate"]["candidate"], 2);

    server.shutdown();
}

#[tokio::test]
async fn unresolved_targets_are_dropped_silently() {
    let (server, addr) = start_relay(&["abc123", "coord1"]).await;
    let (mut sub, mut coord) = pair(addr).await;

    send(&mut coord, json!({"type": "offer", "targetId": "nobody", "offer": {}})).await;
    send(&mut coord, json!({"type": "offer", "targetId": "coord1", "offer": {}})).await;
    send(&mut coord, json!("garbage")).await;

    assert_silent(&mut sub).await;
    assert_silent(&mut coord).await;

    // The connection survives malformed input.
    send(&mut coord, json!({"type": "ice-candidate", "targetId": "abc123", "candidate": {}})).await;
    assert_eq!(recv(&mut sub).await["type"], "ice-candidate");

    server.shutdown();
}

#[tokio::test]
async fn disconnect_releases_the_identifier() {
    let (server, addr) = start_relay(&["abc123", "coord1"]).await;
    let (sub, mut coord) = pair(addr).await;

    drop(sub);
    wait_for_count(&server, Role::Subordinate, 0).await;

    send(&mut coord, json!({"type": "ice-candidate", "targetId": "abc123", "candidate": {}})).await;
    assert_silent(&mut coord).await;
    assert_eq!(server.router().registry().count(Role::Coordinator), 1);

    server.shutdown();
}
