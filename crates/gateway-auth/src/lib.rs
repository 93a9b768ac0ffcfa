//! # gateway-auth
//!
//! Request authentication core of the API gateway.
//!
//! Bearer tokens are verified locally, without calling the authorization
//! service per request:
//!
//! - the issuer's RS256 signing keys are cached and refreshed on a TTL
//! - signature and claims are checked by [`TokenVerifier`]
//! - a revocation registry rejects logged-out tokens that are still
//!   cryptographically valid
//!
//! ## Modules
//!
//! - [`config`] - Authentication configuration
//! - [`error`] - Rejection taxonomy
//! - [`key_set`] - Signing key parsing, providers and the key-set cache
//! - [`token`] - Token verification and claims
//! - [`revocation`] - Revocation registry interface and in-memory registry
//! - [`middleware`] - Axum middleware and extractors
//! - [`http`] - Axum handlers (logout)

pub mod config;
pub mod error;
pub mod http;
pub mod key_set;
pub mod middleware;
pub mod revocation;
pub mod token;

pub use config::{AuthConfig, ConfigError, KeySetConfig, RevocationConfig};
pub use error::{AuthError, Backend, ErrorCategory};
pub use http::{LogoutError, LogoutResponse, logout_handler};
pub use key_set::{
    CacheStatus, HttpKeySetProvider, JwkEntry, KeyMaterial, KeySetCache, KeySetError,
    KeySetProvider, KeySetSnapshot,
};
pub use middleware::{
    AuthStage, AuthState, Authenticated, OptionalIdentity, VerifiedIdentity, require_auth,
};
pub use revocation::{
    InMemoryRevocationRegistry, RevocationError, RevocationKey, RevocationRegistry,
    revocation_ttl,
};
pub use token::{Claims, TokenType, TokenVerifier};
