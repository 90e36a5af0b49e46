//! Workdeck - Persistent Terminal Sessions
//!
//! CLI entry point for the workdeck server.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod cli;
mod middleware;
mod server;

use server::config::LogFormat;

const DEFAULT_LOG_FILTER: &str =
    "workdeck=info,workdeck_terminal=info,workdeck_core=info,tower_http=info";

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // An unreadable config is reported properly once the command runs.
    let format = server::load_config()
        .map(|config| config.logging.format)
        .unwrap_or_default();
    init_tracing(format);

    let cli = cli::Cli::parse();
    cli::run(cli).await
}
