//! WebSocket Protocol Messages
//!
//! JSON messages exchanged with terminal clients. Every message carries a
//! `type` tag; field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Close code sent when the connection token is missing or invalid
pub const CLOSE_UNAUTHORIZED: u16 = 4401;

/// Close code sent after the user typed `exit` or `logout`
pub const CLOSE_NORMAL: u16 = 1000;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Attach to an existing session or start a new one
    Init {
        /// Desired session; absent requests a new session
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Keystrokes for the shell
    Input {
        /// Target session
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Raw input text
        data: String,
    },

    /// Keepalive
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The connection is attached to `session_id`
    Ready {
        /// Resolved session
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Shell output, forwarded verbatim
    Output {
        /// Source session
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Output text
        data: String,
    },

    /// The shell process terminated
    Exit {
        /// Source session
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Exit code; null when killed by a signal
        code: Option<i32>,
    },

    /// Pong response to ping
    Pong,
}

impl ServerMessage {
    /// Create a ready message
    #[must_use]
    pub fn ready(session_id: impl Into<String>) -> Self {
        Self::Ready {
            session_id: session_id.into(),
        }
    }

    /// Create an output message
    #[must_use]
    pub fn output(session_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Output {
            session_id: session_id.into(),
            data: data.into(),
        }
    }

    /// Create an exit message
    #[must_use]
    pub fn exit(session_id: impl Into<String>, code: Option<i32>) -> Self {
        Self::Exit {
            session_id: session_id.into(),
            code,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Token not yet checked
    Connecting,
    /// Token accepted, waiting for `init`
    Authenticated,
    /// Bound to a session
    Attached,
    /// Terminal state
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_init_without_session() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"init"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Init { session_id: None });
    }

    #[test]
    fn test_parse_init_with_session() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"init","sessionId":"term-abc123"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Init {
                session_id: Some("term-abc123".to_string())
            }
        );
    }

    #[test]
    fn test_parse_input() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"input","sessionId":"term-abc123","data":"echo hi\n"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Input { session_id, data } => {
                assert_eq!(session_id, "term-abc123");
                assert_eq!(data, "echo hi\n");
            }
            other => unreachable!("Expected Input message, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_malformed() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"resize"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"input","data":"x"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_server_message_wire_format() {
        let ready = serde_json::to_value(ServerMessage::ready("term-abc123")).unwrap();
        assert_eq!(ready, json!({"type": "ready", "sessionId": "term-abc123"}));

        let output = serde_json::to_value(ServerMessage::output("term-abc123", "hi\n")).unwrap();
        assert_eq!(
            output,
            json!({"type": "output", "sessionId": "term-abc123", "data": "hi\n"})
        );

        let exit = serde_json::to_value(ServerMessage::exit("term-abc123", None)).unwrap();
        assert_eq!(
            exit,
            json!({"type": "exit", "sessionId": "term-abc123", "code": null})
        );

        let pong = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(pong, r#"{"type":"pong"}"#);
    }
}
