//! Server initialization
//!
//! Contains the main `run()` function that starts all server components.

use super::config::AppConfig;
use super::loader::load_config;
use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use workdeck_core::{shutdown_signal_with_controller, AuthStore, ShutdownController, TokenValidator};
use workdeck_terminal::{terminal_ws_handler, IdleReaper, SessionRegistry, TerminalState};

/// Path of the terminal WebSocket endpoint
pub const TERMINAL_WS_PATH: &str = "/ws/terminal";

/// Command-line overrides applied on top of the loaded configuration
#[derive(Debug, Default, Clone)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Build the auth store from configuration
pub fn init_auth(config: &AppConfig) -> Arc<AuthStore> {
    let auth = &config.server.auth;
    let auth_store = Arc::new(AuthStore::new(auth.enabled));

    for (index, token) in auth.tokens.iter().enumerate() {
        if let Err(e) = auth_store.register_token(token, &format!("config-{}", index)) {
            warn!("Skipping configured token #{}: {}", index, e);
        }
    }

    if auth.enabled && auth.auto_generate_key && auth_store.token_count() == 0 {
        match auth_store.generate_token("auto-generated") {
            Ok((token, _hash)) => {
                info!("==========================================================");
                info!("  AUTO-GENERATED ACCESS TOKEN (save this, shown once!):");
                info!("  {}", token.expose_secret());
                info!("==========================================================");
            }
            Err(e) => {
                warn!("Failed to auto-generate access token: {}", e);
            }
        }
    }

    if auth.enabled {
        info!(
            tokens = auth_store.token_count(),
            "Authentication ENABLED - token required for terminal and API access"
        );
    } else {
        warn!(
            "SECURITY: Authentication disabled - anyone who can reach the port gets a shell. \
             Enable [server.auth] enabled = true outside development."
        );
    }

    auth_store
}

/// Build the application router
pub fn build_router(
    config: &AppConfig,
    registry: Arc<SessionRegistry>,
    auth_store: Arc<AuthStore>,
) -> Router {
    let validator: Arc<dyn TokenValidator> = auth_store.clone();
    let terminal_state = Arc::new(TerminalState::from_config(
        registry.clone(),
        &config.terminal,
        validator,
    ));

    let terminal_router = Router::new()
        .route(TERMINAL_WS_PATH, get(terminal_ws_handler))
        .with_state(terminal_state);

    Router::new()
        .merge(crate::api::health_routes())
        .merge(crate::api::sessions_routes())
        .merge(terminal_router)
        .route("/", get(|| async { "workdeck terminal server" }))
        .layer(Extension(registry))
        .layer(Extension(auth_store))
        .layer(TraceLayer::new_for_http())
}

/// Run the server
pub async fn run(overrides: ServeOverrides) -> Result<()> {
    let mut config = load_config()?;
    if let Some(host) = overrides.host {
        config.server.host = host;
    }
    if let Some(port) = overrides.port {
        config.server.port = port;
    }

    info!("Starting workdeck v{}", env!("CARGO_PKG_VERSION"));

    let auth_store = init_auth(&config);
    let registry =
        Arc::new(SessionRegistry::new().with_max_sessions(config.terminal.session_limit()));
    let shutdown_controller = ShutdownController::new();

    let reaper = IdleReaper::from_config(registry.clone(), &config.terminal);
    info!(
        idle_timeout_secs = reaper.idle_timeout().as_secs(),
        sweep_interval_ms = reaper.sweep_interval().as_millis() as u64,
        max_sessions = config.terminal.max_sessions,
        "Terminal sessions configured"
    );
    let reaper_handle = reaper.spawn(shutdown_controller.token());

    let app = build_router(&config, registry.clone(), auth_store);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("HTTP server listening on http://{}", addr);
    info!("Terminal WebSocket at ws://{}{}", addr, TERMINAL_WS_PATH);

    let server_shutdown = shutdown_controller.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_controller(server_shutdown))
        .await
        .context("HTTP server error")?;

    shutdown_controller.shutdown();
    let terminated = registry.shutdown();
    info!(terminated, "Terminal sessions terminated");

    match tokio::time::timeout(std::time::Duration::from_secs(5), reaper_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Idle reaper task error: {}", e),
        Err(_) => warn!("Idle reaper shutdown timeout"),
    }

    info!("workdeck shutdown complete");
    Ok(())
}
