//! Terminal Session Records
//!
//! A session binds an identifier to exactly one shell process and tracks
//! the connections attached to it. All mutable state of a record sits
//! behind one mutex, so eviction and attach cannot interleave: whichever
//! takes the lock first wins, and an attach after eviction is refused.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lock;
use crate::process::{ProcessEvent, ProcessHandle, SpawnSpec};

/// Identifies one duplex connection
pub type ConnectionId = Uuid;

/// Longest line the exit detector keeps; longer input cannot be `exit`.
const LINE_BUFFER_LIMIT: usize = 256;

/// What happened to a chunk of input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    /// Written to the shell
    Forwarded,
    /// Written to the shell, and a typed `exit`/`logout` line was seen
    Logout,
    /// The session is closed; nothing was written
    Stale,
}

/// Accumulates typed characters to spot an `exit` or `logout` command.
///
/// This is a heuristic: it cannot see aliases or functions named `exit`.
#[derive(Debug, Default)]
pub struct LineTracker {
    line: String,
    len: usize,
}

impl LineTracker {
    /// Feed input; returns `true` if a completed line was `exit` or `logout`
    pub fn feed(&mut self, data: &str) -> bool {
        let mut logout = false;
        for ch in data.chars() {
            match ch {
                '\r' | '\n' => {
                    let command = self.line.trim().to_lowercase();
                    if command == "exit" || command == "logout" {
                        logout = true;
                    }
                    self.line.clear();
                    self.len = 0;
                }
                '\u{7f}' | '\u{8}' => {
                    if self.line.pop().is_some() {
                        self.len -= 1;
                    }
                }
                other => {
                    if self.len < LINE_BUFFER_LIMIT {
                        self.line.push(other);
                        self.len += 1;
                    }
                }
            }
        }
        logout
    }

    /// Text typed since the last line terminator
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.line
    }
}

struct SessionState {
    last_activity: Instant,
    line: LineTracker,
    attached: HashSet<ConnectionId>,
    closed: bool,
}

/// One logical terminal
pub struct TerminalSession {
    id: String,
    instance: Uuid,
    created_at: DateTime<Utc>,
    process: ProcessHandle,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("process", &self.process)
            .finish()
    }
}

impl TerminalSession {
    /// Wrap an already spawned process
    #[must_use]
    pub fn new(id: impl Into<String>, process: ProcessHandle) -> Self {
        Self {
            id: id.into(),
            instance: Uuid::new_v4(),
            created_at: Utc::now(),
            process,
            state: Mutex::new(SessionState {
                last_activity: Instant::now(),
                line: LineTracker::default(),
                attached: HashSet::new(),
                closed: false,
            }),
        }
    }

    /// Spawn a shell for a new session
    pub fn spawn(id: impl Into<String>, spec: &SpawnSpec) -> Result<Self> {
        let id = id.into();
        let process = ProcessHandle::spawn(spec)?;
        info!(session_id = %id, pid = ?process.pid(), "Terminal session created");
        Ok(Self::new(id, process))
    }

    /// Session identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Distinguishes two records that reused the same identifier
    #[must_use]
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// When the record was created
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The owned shell process
    #[must_use]
    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    /// Record activity now
    pub fn touch(&self) {
        let mut state = lock(&self.state);
        Self::touch_locked(&mut state);
    }

    fn touch_locked(state: &mut SessionState) {
        state.last_activity = state.last_activity.max(Instant::now());
    }

    /// Last recorded activity
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        lock(&self.state).last_activity
    }

    /// Time since the last activity, measured at `now`
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Whether the session still accepts attaches and input
    #[must_use]
    pub fn is_open(&self) -> bool {
        !lock(&self.state).closed && self.process.is_alive()
    }

    /// Attach a connection; it receives all output produced from now on.
    ///
    /// Past output is not replayed.
    pub fn attach(
        &self,
        connection: ConnectionId,
    ) -> Result<mpsc::UnboundedReceiver<ProcessEvent>> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(Error::SessionClosed(self.id.clone()));
        }
        let rx = self
            .process
            .subscribe(connection)
            .ok_or_else(|| Error::SessionClosed(self.id.clone()))?;
        state.attached.insert(connection);
        Self::touch_locked(&mut state);

        info!(
            session_id = %self.id,
            connection_id = %connection,
            attached = state.attached.len(),
            "Connection attached"
        );
        Ok(rx)
    }

    /// Detach a connection. The process keeps running even with no listeners.
    pub fn detach(&self, connection: ConnectionId) -> bool {
        let mut state = lock(&self.state);
        let removed = state.attached.remove(&connection);
        self.process.unsubscribe(connection);
        if removed {
            info!(
                session_id = %self.id,
                connection_id = %connection,
                attached = state.attached.len(),
                "Connection detached"
            );
        }
        removed
    }

    /// Number of attached connections
    #[must_use]
    pub fn attached_count(&self) -> usize {
        lock(&self.state).attached.len()
    }

    /// Forward typed input to the shell and watch for `exit`/`logout`
    pub fn feed_input(&self, data: &str) -> InputOutcome {
        let mut state = lock(&self.state);
        if state.closed || !self.process.is_alive() {
            debug!(session_id = %self.id, "Dropping input for closed session");
            return InputOutcome::Stale;
        }
        Self::touch_locked(&mut state);
        self.process.write(data.as_bytes());

        if state.line.feed(data) {
            info!(session_id = %self.id, "Exit command typed");
            InputOutcome::Logout
        } else {
            InputOutcome::Forwarded
        }
    }

    /// Close and kill the session if it has been idle for at least `timeout`
    /// as of `now`. Checked under the record lock; returns whether it evicted.
    pub fn evict_if_idle(&self, timeout: Duration, now: Instant) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        let idle = now.saturating_duration_since(state.last_activity);
        if idle < timeout {
            return false;
        }
        Self::close_locked(&mut state);
        self.process.kill();
        info!(
            session_id = %self.id,
            idle_secs = idle.as_secs(),
            "Idle session evicted"
        );
        true
    }

    /// Close and kill the session unconditionally; returns whether this call
    /// closed it.
    pub fn terminate(&self) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        Self::close_locked(&mut state);
        self.process.kill();
        info!(session_id = %self.id, "Session terminated");
        true
    }

    fn close_locked(state: &mut SessionState) {
        state.closed = true;
        state.attached.clear();
        state.line = LineTracker::default();
    }

    /// Point-in-time summary for listings
    #[must_use]
    pub fn info(&self, now: Instant) -> SessionInfo {
        let state = lock(&self.state);
        SessionInfo {
            session_id: self.id.clone(),
            pid: self.process.pid(),
            alive: !state.closed && self.process.is_alive(),
            attached: state.attached.len(),
            idle_secs: now.saturating_duration_since(state.last_activity).as_secs(),
            created_at: self.created_at,
        }
    }
}

/// Serializable session summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session identifier
    pub session_id: String,
    /// Shell process id
    pub pid: Option<u32>,
    /// Whether the shell is still running
    pub alive: bool,
    /// Attached connection count
    pub attached: usize,
    /// Seconds since last activity
    pub idle_secs: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
