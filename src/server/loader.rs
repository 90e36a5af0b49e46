//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    layered_sources()
        .build()
        .context("Failed to build configuration")?
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

fn layered_sources() -> ConfigBuilder<DefaultState> {
    Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var("WORKDECK_ENV").unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority)
        // WORKDECK_TERMINAL__IDLE_TIMEOUT_MS: single _ after the prefix, __ between keys.
        .add_source(
            Environment::with_prefix("WORKDECK")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.auth.tokens")
                .with_list_parse_key("terminal.shell.args")
                .with_list_parse_key("terminal.shell.env")
                .try_parsing(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_parse() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 8790);
        assert_eq!(config.terminal.idle_timeout_ms, 1_800_000);
        assert_eq!(config.terminal.sweep_interval_ms, 60_000);
        assert_eq!(config.terminal.shell.term, "xterm-256color");
        assert!(config.terminal.shell.path.is_none());
    }

    #[test]
    fn test_camel_case_terminal_keys() {
        let config: AppConfig = layered_sources()
            .add_source(File::from_str(
                "[terminal]\nidleTimeoutMs = 1234\nsweepIntervalMs = 55\n",
                FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.terminal.idle_timeout_ms, 1234);
        assert_eq!(config.terminal.sweep_interval_ms, 55);
        assert_eq!(config.server.port, 8790);
    }
}
