//! Error responses for the authentication middleware.
//!
//! Every rejection produces the same response so a caller cannot learn
//! which check failed.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::AuthError;

/// Body of every rejected request.
pub const UNAUTHORIZED_MESSAGE: &str = "unauthorized";

/// Builds the generic `401 Unauthorized` response.
#[must_use]
pub fn unauthorized_response() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));

    (
        StatusCode::UNAUTHORIZED,
        headers,
        Json(json!({ "message": UNAUTHORIZED_MESSAGE })),
    )
        .into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        unauthorized_response()
    }
}
