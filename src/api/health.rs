//! Health check endpoint
//!
//! `/health` is public so load balancers can check it without a token.

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use workdeck_terminal::SessionRegistry;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub version: &'static str,
}

async fn health_check(
    Extension(registry): Extension<Arc<SessionRegistry>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: registry.len(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_session_count() {
        let registry = Arc::new(SessionRegistry::new());
        let Json(response) = health_check(Extension(registry)).await;
        assert_eq!(response.status, "ok");
        assert_eq!(response.sessions, 0);
        assert_eq!(response.version, env!("CARGO_PKG_VERSION"));
    }
}
