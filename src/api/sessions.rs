//! Terminal session admin endpoints
//!
//! GET    /api/v1/terminal/sessions     - List live sessions
//! DELETE /api/v1/terminal/sessions/:id - Kill and evict a session

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;
use workdeck_terminal::{SessionInfo, SessionRegistry};

use super::ApiResponse;
use crate::middleware::auth::RequireAuth;

/// List live sessions, oldest first
async fn list_sessions(
    RequireAuth(_auth): RequireAuth,
    Extension(registry): Extension<Arc<SessionRegistry>>,
) -> Json<ApiResponse<Vec<SessionInfo>>> {
    let now = Instant::now();
    let mut sessions: Vec<SessionInfo> = registry
        .snapshot()
        .iter()
        .map(|session| session.info(now))
        .collect();
    sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(ApiResponse::success(sessions))
}

/// Kill a session's process and drop its record
async fn delete_session(
    RequireAuth(auth): RequireAuth,
    Extension(registry): Extension<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    if registry.terminate(&id) {
        info!(session_id = %id, by = %auth.label, "Session terminated via API");
        (StatusCode::OK, Json(ApiResponse::success(())))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("session not found: {}", id))),
        )
    }
}

/// Create session admin routes
pub fn sessions_routes() -> Router {
    Router::new()
        .route("/api/v1/terminal/sessions", get(list_sessions))
        .route("/api/v1/terminal/sessions/:id", delete(delete_session))
}
