//! Workdeck Terminal - Interactive Shell Sessions
//!
//! This crate keeps shell processes alive across client connections:
//! - Process: spawned shell with output fan-out and exit notification
//! - Session: one identifier bound to one process, plus attached connections
//! - Registry: concurrency-safe session store with atomic create
//! - Multiplexer: per-connection protocol state machine
//! - WebSocket: axum adapter around the multiplexer
//! - Reaper: background eviction of idle sessions
//! - Protocol: JSON wire messages
//!
//! ## Usage
//!
//! ```ignore
//! use workdeck_terminal::{
//!     terminal_ws_handler, IdleReaper, SessionRegistry, TerminalConfig, TerminalState,
//! };
//! use axum::{routing::get, Router};
//! use std::sync::Arc;
//!
//! let config = TerminalConfig::default();
//! let registry = Arc::new(SessionRegistry::new().with_max_sessions(config.session_limit()));
//! let state = Arc::new(TerminalState::from_config(registry.clone(), &config, validator));
//!
//! IdleReaper::from_config(registry.clone(), &config).spawn(shutdown.token());
//!
//! let app: Router<()> = Router::new()
//!     .route("/ws/terminal", get(terminal_ws_handler))
//!     .with_state(state);
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [terminal]
//! idle_timeout_ms = 1800000
//! sweep_interval_ms = 60000
//!
//! [terminal.shell]
//! term = "xterm-256color"
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod multiplexer;
pub mod process;
pub mod protocol;
pub mod reaper;
pub mod registry;
pub mod session;
pub mod websocket;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{ShellConfig, TerminalConfig};
pub use error::{Error, Result};
pub use multiplexer::{Outbound, TerminalConnection};
pub use process::{ProcessEvent, ProcessHandle, SignalKind, SpawnSpec};
pub use protocol::{ClientMessage, ConnectionState, ServerMessage, CLOSE_NORMAL, CLOSE_UNAUTHORIZED};
pub use reaper::IdleReaper;
pub use registry::SessionRegistry;
pub use session::{ConnectionId, InputOutcome, SessionInfo, TerminalSession};
pub use websocket::{extract_token, terminal_ws_handler, TerminalState};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
