//! Terminal session manager configuration
//!
//! ```toml
//! [terminal]
//! idle_timeout_ms = 1800000
//! sweep_interval_ms = 60000
//! max_sessions = 0
//!
//! [terminal.shell]
//! term = "xterm-256color"
//! env = ["LANG=C.UTF-8"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::process::SpawnSpec;

/// Default idle threshold: 30 minutes
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30 * 60 * 1000;
/// Default reaper period: 60 seconds
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60 * 1000;
/// Default terminal type exported to the shell
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Terminal session manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Sessions inactive longer than this are evicted
    // Layered config sources fold keys to lowercase before serde sees them.
    #[serde(
        default = "default_idle_timeout_ms",
        alias = "idleTimeoutMs",
        alias = "idletimeoutms"
    )]
    pub idle_timeout_ms: u64,
    /// Idle reaper tick frequency
    #[serde(
        default = "default_sweep_interval_ms",
        alias = "sweepIntervalMs",
        alias = "sweepintervalms"
    )]
    pub sweep_interval_ms: u64,
    /// Maximum live sessions (0 = unlimited)
    #[serde(default)]
    pub max_sessions: usize,
    /// Largest accepted WebSocket message
    #[serde(default = "default_max_message_size_kb")]
    pub max_message_size_kb: usize,
    /// Shell spawn settings
    #[serde(default)]
    pub shell: ShellConfig,
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

fn default_sweep_interval_ms() -> u64 {
    DEFAULT_SWEEP_INTERVAL_MS
}

fn default_max_message_size_kb() -> usize {
    1024
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            max_sessions: 0,
            max_message_size_kb: default_max_message_size_kb(),
            shell: ShellConfig::default(),
        }
    }
}

impl TerminalConfig {
    /// Idle eviction threshold
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Reaper period; never zero
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Session cap, `None` when unlimited
    #[must_use]
    pub fn session_limit(&self) -> Option<usize> {
        (self.max_sessions > 0).then_some(self.max_sessions)
    }
}

/// How to launch the shell behind each session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Shell executable; platform default when unset
    #[serde(default)]
    pub path: Option<String>,
    /// Shell arguments; interactive flag on unix when unset
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Value exported as `TERM`
    #[serde(default = "default_term")]
    pub term: String,
    /// Working directory; the runtime's own when unset
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra `NAME=value` variables on top of the inherited environment.
    ///
    /// Kept as a list because layered config sources fold map keys to lowercase.
    #[serde(default)]
    pub env: Vec<String>,
}

fn default_term() -> String {
    DEFAULT_TERM.to_string()
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            path: None,
            args: None,
            term: default_term(),
            cwd: None,
            env: Vec::new(),
        }
    }
}

impl ShellConfig {
    /// Resolve platform defaults into a concrete spawn specification
    #[must_use]
    pub fn resolve(&self) -> SpawnSpec {
        let program = self
            .path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(default_shell);
        let args = self.args.clone().unwrap_or_else(default_shell_args);

        let mut env: Vec<(String, String)> = self
            .env
            .iter()
            .filter_map(|entry| match entry.split_once('=') {
                Some((name, value)) if !name.trim().is_empty() => {
                    Some((name.trim().to_string(), value.to_string()))
                }
                _ => {
                    warn!(entry = %entry, "Ignoring shell env entry without NAME=value");
                    None
                }
            })
            .collect();
        env.push(("TERM".to_string(), self.term.clone()));

        SpawnSpec {
            program,
            args,
            env,
            cwd: self.cwd.clone(),
        }
    }
}

#[cfg(unix)]
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

#[cfg(not(unix))]
fn default_shell() -> String {
    std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
}

#[cfg(unix)]
fn default_shell_args() -> Vec<String> {
    vec!["-i".to_string()]
}

#[cfg(not(unix))]
fn default_shell_args() -> Vec<String> {
    Vec::new()
}
