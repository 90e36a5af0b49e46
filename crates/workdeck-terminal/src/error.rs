//! Error types for workdeck-terminal
//!
//! Every failure the session manager can hit maps onto one of these
//! variants. None of them has its own wire channel: the connection layer
//! turns them into a close code or a textual `output` message.

use thiserror::Error;

/// Terminal session error type
#[derive(Debug, Error)]
pub enum Error {
    /// The shell executable could not be launched
    #[error("failed to spawn '{shell}': {source}")]
    Spawn {
        /// Shell executable path
        shell: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The connection presented a missing or invalid token
    #[error("unauthorized connection")]
    Unauthorized,

    /// Undecodable or schema-invalid client message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// No session with this identifier exists
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session was evicted or its process exited
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// Maximum number of live sessions reached
    #[error("maximum sessions exceeded ({0})")]
    MaxSessionsExceeded(usize),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a spawn error
    #[must_use]
    pub fn spawn(shell: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            shell: shell.into(),
            source,
        }
    }

    /// Create an invalid message error
    #[must_use]
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    /// Whether the failure only concerns the current connection
    #[must_use]
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidMessage(_) | Self::SessionNotFound(_) | Self::Serialization(_)
        )
    }

    /// Get error code for logs and admin responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn_failure",
            Self::Unauthorized => "unauthorized",
            Self::InvalidMessage(_) => "invalid_message",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionClosed(_) => "session_closed",
            Self::MaxSessionsExceeded(_) => "max_sessions_exceeded",
            Self::Serialization(_) => "serialization_error",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for terminal operations
pub type Result<T> = std::result::Result<T, Error>;
