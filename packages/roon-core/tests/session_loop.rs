//! Integration test: boots an in-process WebSocket server playing the Roon
//! core, runs a real [`Session`] against it and walks the full lifecycle:
//! registration, ping, pairing, a provided service, a zone subscription,
//! transport loss with reset of pending work, and re-registration with the
//! stored token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use roon_core::moo::{ChunkSource, FrameReader};
use roon_core::services::subscribe_zones;
use roon_core::session::PairingState;
use roon_core::{
    Body, ConfigStore, ExtensionInfo, Frame, MessageType, MooError, Session, SessionConfig,
    SessionEvent, SessionState, StatusService, TokioSpawner, ZoneEvent,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

// ── Mini core: in-process WS server ─────────────────────────────────────

struct ServerChunks(SplitStream<WebSocketStream<TcpStream>>);

#[async_trait]
impl ChunkSource for ServerChunks {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, MooError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(MooError::Transport(e))),
            }
        }
    }
}

/// One accepted extension connection, seen from the core.
struct CoreConn {
    reader: FrameReader<ServerChunks>,
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
}

impl CoreConn {
    async fn recv(&mut self) -> Frame {
        timeout(WAIT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a frame")
            .expect("frame error")
            .expect("connection ended")
    }

    async fn send(&mut self, message_type: MessageType, name: &str, request_id: u64, body: Value) {
        let frame = Frame::new(message_type, name, request_id, Body::from(body));
        self.sink
            .send(Message::Binary(frame.encode().into()))
            .await
            .unwrap();
    }

    /// Answers info + register. Returns the register request body.
    async fn register(&mut self, token: &str) -> Value {
        let info = self.recv().await;
        assert_eq!(info.name, "com.roonlabs.registry:1/info");
        assert_eq!(info.request_id, 0);
        self.send(
            MessageType::Complete,
            "Success",
            info.request_id,
            json!({"core_id": "core-a", "display_name": "Test Core", "display_version": "1.0"}),
        )
        .await;

        let register = self.recv().await;
        assert_eq!(register.name, "com.roonlabs.registry:1/register");
        let body: Value = register.json().unwrap();
        self.send(
            MessageType::Complete,
            "Registered",
            register.request_id,
            json!({"core_id": "core-a", "display_name": "Test Core", "token": token}),
        )
        .await;
        body
    }

    async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}

async fn start_mini_core() -> (SocketAddr, mpsc::Receiver<CoreConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            let conn_tx = conn_tx.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (sink, stream) = ws.split();
                let conn = CoreConn {
                    reader: FrameReader::new(ServerChunks(stream)),
                    sink,
                };
                let _ = conn_tx.send(conn).await;
            });
        }
    });

    (addr, conn_rx)
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn fast_reconnect() -> SessionConfig {
    SessionConfig {
        short_backoff: Duration::from_millis(20),
        long_backoff: Duration::from_millis(20),
        ..SessionConfig::default()
    }
}

// ── The test ────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_lifecycle_against_mini_core() {
    let (addr, mut conns) = start_mini_core().await;
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(
        fast_reconnect(),
        ExtensionInfo::default(),
        Arc::new(ConfigStore::new(dir.path())),
    )
    .unwrap();
    let status = StatusService::register(&session);
    let mut events = session.subscribe_events();

    session.start(&TokioSpawner::current(), format!("ws://{}/api", addr));
    let mut conn = timeout(WAIT, conns.recv()).await.unwrap().unwrap();

    // Registration: first contact carries no token.
    let register = conn.register("tok-1").await;
    assert_eq!(register["extension_id"], "com.example.roon-agent");
    assert!(register.get("token").is_none());
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Registered { .. })).await;
    assert_eq!(session.state(), SessionState::Unpaired);
    assert_eq!(session.core_info().unwrap().display_name, "Test Core");

    // Ping.
    conn.send(MessageType::Request, "com.roonlabs.ping:1/ping", 100, Value::Null)
        .await;
    let pong = conn.recv().await;
    assert_eq!((pong.message_type, pong.name.as_str(), pong.request_id), (MessageType::Complete, "Success", 100));

    // Pairing.
    conn.send(
        MessageType::Request,
        "com.roonlabs.pairing:1/subscribe_pairing",
        101,
        json!({"subscription_key": 0}),
    )
    .await;
    let subscribed = conn.recv().await;
    assert_eq!(subscribed.message_type, MessageType::Continue);
    assert_eq!(subscribed.json::<Value>().unwrap()["paired_core_id"], "core-a");
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Paired { .. })).await;

    let stored: PairingState = ConfigStore::new(dir.path()).load("RoonState").unwrap();
    assert_eq!(stored.token_for("core-a"), Some("tok-1"));
    assert_eq!(stored.paired_core_id.as_deref(), Some("core-a"));

    // Provided status service.
    conn.send(
        MessageType::Request,
        "com.roonlabs.status:1/subscribe_status",
        102,
        json!({"subscription_key": 5}),
    )
    .await;
    assert_eq!(conn.recv().await.name, "Subscribed");
    assert_eq!(status.set_status("Watching Kitchen", false).await, 1);
    let changed = conn.recv().await;
    assert_eq!((changed.name.as_str(), changed.request_id), ("Changed", 102));
    assert_eq!(changed.json::<Value>().unwrap()["message"], "Watching Kitchen");

    // Zone subscription driven by the core's pushes.
    let mut zones = subscribe_zones(&session, 1).await.unwrap();
    let subscribe = conn.recv().await;
    assert_eq!(subscribe.name, "com.roonlabs.transport:2/subscribe_zones");
    assert_eq!(subscribe.json::<Value>().unwrap()["subscription_key"], 1);
    conn.send(
        MessageType::Continue,
        "Subscribed",
        subscribe.request_id,
        json!({"zones": [{"zone_id": "z1", "display_name": "Kitchen", "state": "playing"}]}),
    )
    .await;
    match timeout(WAIT, zones.recv()).await.unwrap().unwrap() {
        ZoneEvent::Snapshot(list) => assert_eq!(list[0].display_name, "Kitchen"),
        other => panic!("expected snapshot, got {:?}", other),
    }

    // A request in flight when the transport drops fails with SessionReset.
    let pending = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .send_request("com.roonlabs.transport:2/get_zones", Body::Empty)
                .await
        })
    };
    assert_eq!(conn.recv().await.name, "com.roonlabs.transport:2/get_zones");
    conn.close().await;

    let result = timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(MooError::SessionReset)));
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    assert!(timeout(WAIT, zones.recv()).await.unwrap().is_none());
    assert_eq!(status.subscriber_count(), 0);

    // Reconnect: ids restart at 0 and the stored token is presented.
    let mut conn = timeout(WAIT, conns.recv()).await.unwrap().unwrap();
    let register = conn.register("tok-1").await;
    assert_eq!(register["token"], "tok-1");
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Registered { .. })).await;

    session.close().await;
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::StateChanged { state: SessionState::Disconnected })
    })
    .await;
    assert!(session.is_closed());
}

#[tokio::test]
async fn unreachable_core_keeps_retrying_until_closed() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new(
        fast_reconnect(),
        ExtensionInfo::default(),
        Arc::new(ConfigStore::new(dir.path())),
    )
    .unwrap();
    let mut events = session.subscribe_events();

    // Bind then drop a listener so the port is closed.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    session.start(&TokioSpawner::current(), format!("ws://{}/api", addr));

    for _ in 0..2 {
        let event =
            wait_for_event(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
        assert_eq!(event, SessionEvent::Disconnected { frames_received: 0 });
    }

    session.close().await;
    assert!(session.is_closed());
}
