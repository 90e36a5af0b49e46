//! Connection Multiplexer
//!
//! Per-connection protocol state machine, independent of the transport.
//! The transport feeds decoded text frames in and drains [`Outbound`]
//! items from the channel handed to [`TerminalConnection::new`].
//!
//! ```text
//! Connecting ──auth ok──▶ Authenticated ──init──▶ Attached ──close──▶ Closed
//!      └──────auth failed─────────────────────────────────────────────▲
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use workdeck_core::TokenValidator;

use crate::error::{Error, Result};
use crate::process::{ProcessEvent, SignalKind, SpawnSpec};
use crate::protocol::{
    ClientMessage, ConnectionState, ServerMessage, CLOSE_NORMAL, CLOSE_UNAUTHORIZED,
};
use crate::registry::{is_valid_session_id, SessionRegistry};
use crate::session::{ConnectionId, InputOutcome, TerminalSession};

/// Attempts to attach before giving up on a session that keeps closing
const ATTACH_ATTEMPTS: usize = 3;

/// Item queued for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send a protocol message
    Message(ServerMessage),
    /// Close the transport with this code and reason
    Close {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// One client connection
pub struct TerminalConnection {
    id: ConnectionId,
    registry: Arc<SessionRegistry>,
    spawn_spec: Arc<SpawnSpec>,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: ConnectionState,
    session: Option<Arc<TerminalSession>>,
    forwarder: Option<JoinHandle<()>>,
}

impl TerminalConnection {
    /// Create a connection in the `Connecting` state
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        spawn_spec: Arc<SpawnSpec>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            spawn_spec,
            outbound,
            state: ConnectionState::Connecting,
            session: None,
            forwarder: None,
        }
    }

    /// Connection identifier
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identifier of the attached session, if any
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref().map(TerminalSession::id)
    }

    /// Check the connection token once, before any protocol message.
    ///
    /// On failure a close with [`CLOSE_UNAUTHORIZED`] is queued and the
    /// connection moves straight to `Closed`.
    pub fn authenticate(
        &mut self,
        validator: &dyn TokenValidator,
        token: Option<&str>,
    ) -> Result<()> {
        if self.state != ConnectionState::Connecting {
            return Ok(());
        }
        if validator.is_valid(token.unwrap_or_default()) {
            self.state = ConnectionState::Authenticated;
            debug!(connection_id = %self.id, "Connection authenticated");
            Ok(())
        } else {
            warn!(connection_id = %self.id, "Rejecting unauthorized connection");
            self.send(Outbound::Close {
                code: CLOSE_UNAUTHORIZED,
                reason: "unauthorized".to_string(),
            });
            self.state = ConnectionState::Closed;
            Err(Error::Unauthorized)
        }
    }

    /// Handle one inbound text frame. Malformed payloads are logged and
    /// dropped; the connection stays open.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                let error = Error::invalid_message(e.to_string());
                warn!(connection_id = %self.id, error = %error, "Ignoring malformed message");
            }
        }
    }

    /// Handle one decoded client message
    pub async fn handle_message(&mut self, message: ClientMessage) {
        match (self.state, message) {
            (ConnectionState::Connecting | ConnectionState::Closed, message) => {
                debug!(
                    connection_id = %self.id,
                    state = ?self.state,
                    message = ?message,
                    "Message outside protocol state, ignoring"
                );
            }
            (_, ClientMessage::Ping) => self.send(Outbound::Message(ServerMessage::Pong)),
            (_, ClientMessage::Init { session_id }) => self.init(session_id).await,
            (_, ClientMessage::Input { session_id, data }) => self.input(&session_id, &data),
        }
    }

    async fn init(&mut self, requested: Option<String>) {
        self.detach();

        let id = match requested {
            Some(id) if self.registry.contains(&id) || is_valid_session_id(&id) => id,
            Some(id) => {
                debug!(
                    connection_id = %self.id,
                    requested = %id,
                    "Unusable session id, allocating"
                );
                self.registry.allocate_id()
            }
            None => self.registry.allocate_id(),
        };

        match self.attach(&id).await {
            Ok((session, rx)) => {
                // ready is queued before the forwarder exists, so it precedes all output.
                self.send(Outbound::Message(ServerMessage::ready(&id)));
                self.forwarder = Some(spawn_forwarder(id, rx, self.outbound.clone()));
                self.session = Some(session);
                self.state = ConnectionState::Attached;
            }
            Err(e) => {
                warn!(
                    connection_id = %self.id,
                    session_id = %id,
                    code = e.code(),
                    error = %e,
                    "Session init failed"
                );
                self.send(Outbound::Message(ServerMessage::output(
                    &id,
                    format!("\r\n[workdeck] {}\r\n", e),
                )));
                self.state = ConnectionState::Authenticated;
            }
        }
    }

    async fn attach(
        &self,
        id: &str,
    ) -> Result<(Arc<TerminalSession>, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let mut last_error = Error::SessionClosed(id.to_string());
        for _ in 0..ATTACH_ATTEMPTS {
            let spec = self.spawn_spec.clone();
            let (session, created) = self
                .registry
                .get_or_create(id, move |id| TerminalSession::spawn(id, &spec))
                .await?;

            match session.attach(self.id) {
                Ok(rx) => {
                    info!(
                        connection_id = %self.id,
                        session_id = %id,
                        reattach = !created,
                        "Connection ready"
                    );
                    return Ok((session, rx));
                }
                Err(e @ Error::SessionClosed(_)) => {
                    // Evicted or exited between lookup and attach; drop the dead record.
                    debug!(session_id = %id, "Session closed during attach, retrying");
                    self.registry.remove_instance(id, session.instance());
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    fn input(&mut self, session_id: &str, data: &str) {
        let session = match self.session.clone() {
            Some(session) if session.id() == session_id => session,
            attached => {
                let error = Error::SessionNotFound(session_id.to_string());
                debug!(
                    connection_id = %self.id,
                    attached = ?attached.as_deref().map(TerminalSession::id),
                    error = %error,
                    "Dropping stale input"
                );
                return;
            }
        };

        let outcome = session.feed_input(data);
        if outcome == InputOutcome::Stale {
            return;
        }
        for kind in data.bytes().filter_map(SignalKind::from_control_byte) {
            session.process().signal(kind);
        }

        if outcome == InputOutcome::Logout {
            info!(
                connection_id = %self.id,
                session_id = %session_id,
                "Closing connection on logout"
            );
            self.send(Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "logout".to_string(),
            });
            self.close();
        }
    }

    fn detach(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(session) = self.session.take() {
            session.detach(self.id);
        }
    }

    /// Detach from the session and move to `Closed`. The process keeps running.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed && self.session.is_none() {
            return;
        }
        self.detach();
        self.state = ConnectionState::Closed;
        debug!(connection_id = %self.id, "Connection closed");
    }

    fn send(&self, item: Outbound) {
        if self.outbound.send(item).is_err() {
            debug!(connection_id = %self.id, "Transport gone, dropping outbound item");
        }
    }
}

impl Drop for TerminalConnection {
    fn drop(&mut self) {
        self.detach();
    }
}

fn spawn_forwarder(
    session_id: String,
    mut rx: mpsc::UnboundedReceiver<ProcessEvent>,
    outbound: mpsc::UnboundedSender<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let message = match event {
                ProcessEvent::Output(data) => ServerMessage::output(&session_id, data),
                ProcessEvent::Exit(code) => {
                    let exit = ServerMessage::exit(&session_id, code);
                    let _ = outbound.send(Outbound::Message(exit));
                    break;
                }
            };
            if outbound.send(Outbound::Message(message)).is_err() {
                break;
            }
        }
    })
}
