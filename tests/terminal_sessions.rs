//! Integration tests for workdeck terminal sessions
//!
//! These tests drive real shell processes through the public API:
//! - WebSocket: auth gate, init/ready, input/output round trip
//! - Multiplexer: reattach, fan-out, detach, logout
//! - Registry and reaper: concurrent creation, idle reclamation

#![cfg(unix)]

use axum::{routing::get, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use workdeck_core::{AuthStore, TokenValidator};
use workdeck_terminal::{
    terminal_ws_handler, ClientMessage, IdleReaper, Outbound, ServerMessage, SessionRegistry,
    SpawnSpec, TerminalConnection, TerminalState, CLOSE_NORMAL, CLOSE_UNAUTHORIZED,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const TOKEN: &str = "wdk_integration";

// ============================================================================
// Helpers
// ============================================================================

fn shell() -> SpawnSpec {
    SpawnSpec::new("/bin/sh")
}

struct Client {
    conn: TerminalConnection,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl Client {
    fn new(registry: &Arc<SessionRegistry>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut conn = TerminalConnection::new(registry.clone(), Arc::new(shell()), tx);
        conn.authenticate(&AuthStore::new(false), None).unwrap();
        Self { conn, rx }
    }

    async fn init(&mut self, session_id: Option<&str>) -> String {
        self.conn
            .handle_message(ClientMessage::Init {
                session_id: session_id.map(str::to_string),
            })
            .await;
        match self.next().await {
            Outbound::Message(ServerMessage::Ready { session_id }) => session_id,
            other => panic!("expected ready, got {:?}", other),
        }
    }

    async fn input(&mut self, session_id: &str, data: &str) {
        self.conn
            .handle_message(ClientMessage::Input {
                session_id: session_id.to_string(),
                data: data.to_string(),
            })
            .await;
    }

    async fn next(&mut self) -> Outbound {
        tokio::time::timeout(TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for server")
            .expect("outbound channel closed")
    }

    /// Collect output text until it contains `needle`; fails on exit.
    async fn output_until(&mut self, needle: &str) -> String {
        let mut text = String::new();
        while !text.contains(needle) {
            match self.next().await {
                Outbound::Message(ServerMessage::Output { data, .. }) => text.push_str(&data),
                other => panic!("expected output before {:?}, got {:?}", needle, other),
            }
        }
        text
    }
}

async fn start_server(auth_store: AuthStore) -> (SocketAddr, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new());
    let validator: Arc<dyn TokenValidator> = Arc::new(auth_store);
    let state = Arc::new(TerminalState::new(registry.clone(), shell(), validator));
    let app = Router::new()
        .route("/ws/terminal", get(terminal_ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, registry)
}

fn secured_store() -> AuthStore {
    let store = AuthStore::new(true);
    store.register_token(TOKEN, "integration").unwrap();
    store
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn recv_frame(ws: &mut WsStream) -> Message {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn recv_json(ws: &mut WsStream) -> Value {
    match recv_frame(ws).await {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

// ============================================================================
// WebSocket
// ============================================================================

#[tokio::test]
async fn test_ws_scenario_init_input_output() {
    let (addr, registry) = start_server(secured_store()).await;
    let url = format!("ws://{}/ws/terminal?token={}", addr, TOKEN);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    send_json(&mut ws, json!({"type": "init"})).await;
    let ready = recv_json(&mut ws).await;
    assert_eq!(ready["type"], "ready");
    let session_id = ready["sessionId"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("term-"));

    send_json(
        &mut ws,
        json!({"type": "input", "sessionId": session_id, "data": "echo hi\n"}),
    )
    .await;

    let mut text = String::new();
    while !text.contains("hi\n") {
        let msg = recv_json(&mut ws).await;
        assert_eq!(msg["type"], "output", "output must precede exit: {}", msg);
        assert_eq!(msg["sessionId"], session_id.as_str());
        text.push_str(msg["data"].as_str().unwrap());
    }

    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(recv_json(&mut ws).await, json!({"type": "pong"}));

    // Garbage does not close the connection.
    ws.send(Message::Text("{nope".to_string())).await.unwrap();
    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(recv_json(&mut ws).await, json!({"type": "pong"}));

    ws.close(None).await.unwrap();
    registry.shutdown();
}

#[tokio::test]
async fn test_ws_rejects_missing_token() {
    let (addr, registry) = start_server(secured_store()).await;
    let url = format!("ws://{}/ws/terminal", addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    match recv_frame(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), CLOSE_UNAUTHORIZED),
        other => panic!("expected close frame, got {:?}", other),
    }
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_ws_rejects_bad_token() {
    let (addr, registry) = start_server(secured_store()).await;
    let url = format!("ws://{}/ws/terminal?token=wdk_wrong", addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    match recv_frame(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), CLOSE_UNAUTHORIZED),
        other => panic!("expected close frame, got {:?}", other),
    }
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_ws_logout_closes_normally() {
    let (addr, registry) = start_server(secured_store()).await;
    let url = format!("ws://{}/ws/terminal?token={}", addr, TOKEN);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    send_json(&mut ws, json!({"type": "init", "sessionId": "ws-logout"})).await;
    assert_eq!(
        recv_json(&mut ws).await,
        json!({"type": "ready", "sessionId": "ws-logout"})
    );

    send_json(
        &mut ws,
        json!({"type": "input", "sessionId": "ws-logout", "data": "exit\r"}),
    )
    .await;

    loop {
        match recv_frame(&mut ws).await {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), CLOSE_NORMAL);
                break;
            }
            Message::Text(_) => continue,
            other => panic!("unexpected frame {:?}", other),
        }
    }
    registry.shutdown();
}

// ============================================================================
// Multiplexer
// ============================================================================

#[tokio::test]
async fn test_reattach_preserves_process_identity() {
    let registry = Arc::new(SessionRegistry::new());

    let mut a = Client::new(&registry);
    let id = a.init(None).await;
    a.input(&id, "MARK=from-a\n").await;
    a.input(&id, "echo pid=$$\n").await;
    let first = a.output_until("\n").await;

    let mut b = Client::new(&registry);
    assert_eq!(b.init(Some(&id)).await, id);
    drop(a);

    b.input(&id, "echo pid=$$ mark=$MARK\n").await;
    let second = b.output_until("mark=from-a\n").await;

    assert_eq!(first.trim(), second.trim().trim_end_matches(" mark=from-a"));
    assert_eq!(registry.len(), 1);
    registry.shutdown();
}

#[tokio::test]
async fn test_detach_without_kill() {
    let registry = Arc::new(SessionRegistry::new());

    let mut a = Client::new(&registry);
    let id = a.init(Some("keep-alive")).await;
    a.conn.close();

    let session = registry.get(&id).expect("session survives detach");
    assert_eq!(session.attached_count(), 0);
    assert!(session.process().is_alive());

    let mut b = Client::new(&registry);
    assert_eq!(b.init(Some(&id)).await, id);
    b.input(&id, "echo still-here\n").await;
    b.output_until("still-here\n").await;
    registry.shutdown();
}

#[tokio::test]
async fn test_fan_out_preserves_order() {
    let registry = Arc::new(SessionRegistry::new());

    let mut a = Client::new(&registry);
    let id = a.init(None).await;
    let mut b = Client::new(&registry);
    b.init(Some(&id)).await;

    a.input(&id, "echo o1; echo o2; echo o3\n").await;
    let seen_a = a.output_until("o3\n").await;
    let seen_b = b.output_until("o3\n").await;

    assert_eq!(seen_a, "o1\no2\no3\n");
    assert_eq!(seen_a, seen_b);
    registry.shutdown();
}

#[tokio::test]
async fn test_exit_typed_closes_before_process_exit() {
    let registry = Arc::new(SessionRegistry::new());

    let mut a = Client::new(&registry);
    let id = a.init(None).await;
    // "\r" is not a line end for sh, so the shell itself keeps running.
    a.input(&id, "exit\r").await;

    match a.next().await {
        Outbound::Close { code, reason } => {
            assert_eq!(code, CLOSE_NORMAL);
            assert_eq!(reason, "logout");
        }
        other => panic!("expected close, got {:?}", other),
    }
    assert!(registry.get(&id).unwrap().process().is_alive());
    registry.shutdown();
}

#[tokio::test]
async fn test_process_exit_broadcasts_and_removes() {
    let registry = Arc::new(SessionRegistry::new());

    let mut a = Client::new(&registry);
    let id = a.init(None).await;
    let mut b = Client::new(&registry);
    b.init(Some(&id)).await;

    a.input(&id, "exit 5\n").await;
    for client in [&mut a, &mut b] {
        loop {
            match client.next().await {
                Outbound::Message(ServerMessage::Exit { session_id, code }) => {
                    assert_eq!(session_id, id);
                    assert_eq!(code, Some(5));
                    break;
                }
                Outbound::Message(ServerMessage::Output { .. }) => continue,
                other => panic!("expected exit, got {:?}", other),
            }
        }
    }

    tokio::time::timeout(TIMEOUT, async {
        while registry.contains(&id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("exited session still registered");

    // Input to the dead session is silently dropped.
    a.input(&id, "echo nothing\n").await;
    assert!(a.rx.try_recv().is_err());
}

// ============================================================================
// Registry and reaper
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_init_spawns_one_process() {
    let registry = Arc::new(SessionRegistry::new());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::new(&registry);
            let id = client.init(Some("shared-tab")).await;
            let pid = registry.get(&id).unwrap().process().pid();
            (client, id, pid)
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(registry.len(), 1);
    let (_, _, pid) = &results[0];
    assert!(results.iter().all(|(_, id, p)| id == "shared-tab" && p == pid));
    assert_eq!(registry.get("shared-tab").unwrap().attached_count(), 8);
    registry.shutdown();
}

#[tokio::test]
async fn test_idle_reclamation() {
    let registry = Arc::new(SessionRegistry::new());
    let mut a = Client::new(&registry);
    let id = a.init(None).await;
    let session = registry.get(&id).unwrap();

    let reaper = IdleReaper::new(
        registry.clone(),
        Duration::from_millis(100),
        Duration::from_millis(25),
    );
    let token = tokio_util::sync::CancellationToken::new();
    let handle = reaper.spawn(token.clone());

    tokio::time::timeout(TIMEOUT, async {
        while registry.contains(&id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("idle session not reaped");

    assert!(!session.is_open());
    loop {
        match a.next().await {
            Outbound::Message(ServerMessage::Exit { code, .. }) => {
                assert_eq!(code, None);
                break;
            }
            Outbound::Message(ServerMessage::Output { .. }) => continue,
            other => panic!("expected exit, got {:?}", other),
        }
    }

    token.cancel();
    handle.await.unwrap();
}
