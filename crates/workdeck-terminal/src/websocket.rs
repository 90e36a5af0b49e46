//! WebSocket Handler
//!
//! axum adapter that pumps frames between a WebSocket and a
//! [`TerminalConnection`].

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        RawQuery, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use workdeck_core::TokenValidator;

use crate::config::TerminalConfig;
use crate::multiplexer::{Outbound, TerminalConnection};
use crate::process::SpawnSpec;
use crate::registry::SessionRegistry;

/// Shared state for the WebSocket handler
pub struct TerminalState {
    /// Session registry
    pub registry: Arc<SessionRegistry>,
    /// How new sessions spawn their shell
    pub spawn_spec: Arc<SpawnSpec>,
    /// Auth Gate
    pub validator: Arc<dyn TokenValidator>,
    /// Largest accepted message in bytes
    pub max_message_size: usize,
}

impl TerminalState {
    /// Create handler state
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        spawn_spec: SpawnSpec,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        Self {
            registry,
            spawn_spec: Arc::new(spawn_spec),
            validator,
            max_message_size: TerminalConfig::default().max_message_size_kb * 1024,
        }
    }

    /// Create handler state from configuration
    #[must_use]
    pub fn from_config(
        registry: Arc<SessionRegistry>,
        config: &TerminalConfig,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        Self {
            max_message_size: config.max_message_size_kb.max(1) * 1024,
            ..Self::new(registry, config.shell.resolve(), validator)
        }
    }
}

/// Pull the connection token from headers or the query string.
///
/// Checked in order: `Authorization: Bearer <token>`, `X-API-Key`, `?token=`.
#[must_use]
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }

    serde_urlencoded::from_str::<Vec<(String, String)>>(query?)
        .ok()?
        .into_iter()
        .find_map(|(key, value)| (key == "token").then_some(value))
}

/// WebSocket upgrade handler
pub async fn terminal_ws_handler(
    ws: WebSocketUpgrade,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    State(state): State<Arc<TerminalState>>,
) -> impl IntoResponse {
    let token = extract_token(&headers, query.as_deref());
    debug!(has_token = token.is_some(), "Terminal WebSocket upgrade requested");
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, token, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, token: Option<String>, state: Arc<TerminalState>) {
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let mut conn = TerminalConnection::new(state.registry.clone(), state.spawn_spec.clone(), tx);
    let connection_id = conn.id();
    info!(connection_id = %connection_id, "Terminal WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // A rejected connection still drains its queued close frame below.
    let _ = conn.authenticate(state.validator.as_ref(), token.as_deref());

    loop {
        tokio::select! {
            item = outbound.recv() => {
                match item {
                    Some(Outbound::Message(msg)) => {
                        let json = match serde_json::to_string(&msg) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize message");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let frame = CloseFrame { code, reason: reason.into() };
                        let _ = sender.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    None => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        conn.handle_text(&text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => conn.handle_text(&text).await,
                        Err(_) => warn!(connection_id = %connection_id, "Ignoring non UTF-8 frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %connection_id, "WebSocket closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                }
            }
        }
    }

    conn.close();
    info!(connection_id = %connection_id, "Terminal WebSocket disconnected");
}
