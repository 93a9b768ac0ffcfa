//! Logout endpoint.
//!
//! Records the caller's own token in the revocation registry so that it is
//! rejected on every later request until it expires.
//!
//! A registry failure is answered with `500`, never with success: the token
//! is still valid at that point.
//!
//! # Usage
//!
//! ```ignore
//! use axum::{Router, middleware, routing::post};
//! use gateway_auth::http::logout_handler;
//! use gateway_auth::middleware::require_auth;
//!
//! let app = Router::new()
//!     .route("/v1/user/logout", post(logout_handler))
//!     .route_layer(middleware::from_fn_with_state(auth_state.clone(), require_auth))
//!     .with_state(auth_state);
//! ```

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::middleware::{AuthState, Authenticated};
use crate::revocation::RevocationError;

/// Response of a successful logout.
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    /// Always `"ok"`.
    pub message: String,
}

/// Logout failures.
#[derive(Debug, thiserror::Error)]
pub enum LogoutError {
    /// The revocation could not be recorded.
    #[error("Failed to record revocation: {0}")]
    Revocation(#[from] RevocationError),
}

impl IntoResponse for LogoutError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "internal error" })),
        )
            .into_response()
    }
}

/// Handler for `POST /logout`. Must be mounted behind [`crate::middleware::require_auth`].
pub async fn logout_handler(
    State(state): State<AuthState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<LogoutResponse>, LogoutError> {
    state.revoke(&identity).await.map_err(|e| {
        tracing::error!(subject = %identity.subject(), error = %e, "Logout failed");
        LogoutError::from(e)
    })?;

    Ok(Json(LogoutResponse {
        message: "ok".to_string(),
    }))
}
