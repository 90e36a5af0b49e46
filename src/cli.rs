//! CLI module for workdeck
//!
//! Provides commands:
//! - `serve`: Start the terminal server (default)
//! - `config`: Print the effective configuration

use clap::{Parser, Subcommand};

use crate::server::{self, ServeOverrides};

/// Workdeck terminal server CLI
#[derive(Parser, Debug)]
#[command(name = "workdeck")]
#[command(about = "Persistent interactive shell sessions over WebSocket")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server (default)
    Serve {
        /// Bind address, overrides server.host
        #[arg(long)]
        host: Option<String>,
        /// Listen port, overrides server.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve { host, port }) => server::run(ServeOverrides { host, port }).await,
        None => server::run(ServeOverrides::default()).await,
        Some(Commands::Config) => {
            let config = server::load_config()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
