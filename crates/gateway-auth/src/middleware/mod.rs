//! HTTP middleware for bearer token authentication.
//!
//! This module provides:
//!
//! - [`require_auth`] - axum middleware running the per-request flow
//! - [`Authenticated`] / [`OptionalIdentity`] - extractors for the admitted identity
//! - the generic 401 response used for every rejection

pub mod auth;
pub mod error;
pub mod types;

pub use auth::{AuthStage, AuthState, Authenticated, OptionalIdentity, require_auth};
pub use error::{UNAUTHORIZED_MESSAGE, unauthorized_response};
pub use types::VerifiedIdentity;
