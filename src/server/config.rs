//! Server configuration types
//!
//! Contains all configuration structures for the workdeck server.

use serde::{Deserialize, Serialize};
use workdeck_terminal::TerminalConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8790
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: AuthConfig::default(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Enable authentication
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Raw tokens accepted at startup
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Generate and print one token when none is configured
    #[serde(default = "default_true")]
    pub auto_generate_key: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tokens: Vec::new(),
            auto_generate_key: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.auth.enabled);
        assert!(config.server.auth.tokens.is_empty());
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.terminal.idle_timeout_ms, 30 * 60 * 1000);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [server.auth]
            enabled = false

            [terminal]
            idleTimeoutMs = 5000

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(!config.server.auth.enabled);
        assert_eq!(config.terminal.idle_timeout_ms, 5000);
        assert_eq!(config.terminal.sweep_interval_ms, 60_000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
