//! Authentication extractor for Axum
//!
//! Extracts Bearer tokens or API keys from requests and validates them
//! against the AuthStore. Provides `RequireAuth` extractor for handlers.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use workdeck_core::{AuthContext, AuthError, AuthStore};
use workdeck_terminal::extract_token;

/// JSON error response for auth failures
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    success: bool,
    error: String,
    code: String,
}

impl AuthErrorResponse {
    fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Auth rejection type
pub struct AuthRejection {
    status: StatusCode,
    body: AuthErrorResponse,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<AuthError> for AuthRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new(
                    "Authentication required. \
                     Provide Authorization: Bearer <token> or X-API-Key header.",
                    "UNAUTHORIZED",
                ),
            },
            AuthError::InvalidCredentials => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new("Invalid token or API key", "INVALID_CREDENTIALS"),
            },
            AuthError::Internal(msg) => AuthRejection {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: AuthErrorResponse::new(msg, "INTERNAL_ERROR"),
            },
        }
    }
}

/// Axum extractor that requires authentication.
///
/// Extracts the token from:
/// 1. `Authorization: Bearer <token>` header
/// 2. `X-API-Key: <key>` header
/// 3. `?token=<token>` query parameter
pub struct RequireAuth(pub AuthContext);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let auth_store = parts
            .extensions
            .get::<Arc<AuthStore>>()
            .ok_or_else(|| AuthError::Internal("AuthStore not configured".to_string()))?;

        if !auth_store.is_enabled() {
            return Ok(RequireAuth(AuthContext::anonymous()));
        }

        let token = extract_token(&parts.headers, parts.uri.query())
            .ok_or(AuthError::MissingCredentials)?;
        let ctx = auth_store.validate_token(&token)?;

        Ok(RequireAuth(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tokio_test::{assert_err, assert_ok};
    use workdeck_core::AuthMethod;

    async fn extract(store: AuthStore, request: Request<()>) -> Result<AuthContext, StatusCode> {
        let (mut parts, _) = request.into_parts();
        parts.extensions.insert(Arc::new(store));
        RequireAuth::from_request_parts(&mut parts, &())
            .await
            .map(|RequireAuth(ctx)| ctx)
            .map_err(|rejection| rejection.status)
    }

    #[test]
    fn test_auth_error_response_unauthorized() {
        let rejection = AuthRejection::from(AuthError::MissingCredentials);
        assert_eq!(rejection.status, StatusCode::UNAUTHORIZED);
        let rejection = AuthRejection::from(AuthError::Internal("boom".to_string()));
        assert_eq!(rejection.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_disabled_auth_is_anonymous() {
        let request = Request::builder().uri("/api/v1/terminal/sessions").body(()).unwrap();
        let ctx = assert_ok!(extract(AuthStore::new(false), request).await);
        assert_eq!(ctx.method, AuthMethod::Anonymous);
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let request = Request::builder().uri("/api/v1/terminal/sessions").body(()).unwrap();
        let status = assert_err!(extract(AuthStore::new(true), request).await);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_query_token_accepted() {
        let store = AuthStore::new(true);
        store.register_token("wdk_secret", "test").unwrap();
        let request = Request::builder()
            .uri("/api/v1/terminal/sessions?token=wdk_secret")
            .body(())
            .unwrap();
        let ctx = extract(store, request).await.unwrap();
        assert_eq!(ctx.label, "test");
    }

    #[tokio::test]
    async fn test_percent_encoded_query_token_accepted() {
        let store = AuthStore::new(true);
        store.register_token("wdk+secret/1", "encoded").unwrap();
        let request = Request::builder()
            .uri("/api/v1/terminal/sessions?token=wdk%2Bsecret%2F1")
            .body(())
            .unwrap();
        let ctx = assert_ok!(extract(store, request).await);
        assert_eq!(ctx.label, "encoded");
    }
}
