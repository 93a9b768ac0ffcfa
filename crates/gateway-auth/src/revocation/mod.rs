//! Revocation registry interface.
//!
//! Logged-out tokens stay cryptographically valid until they expire, so the
//! gateway keeps a registry of revoked tokens and consults it on every
//! request.
//!
//! # Security Considerations
//!
//! - The registry is keyed by [`RevocationKey`], a SHA-256 digest of the raw
//!   token; raw bearer tokens are never handed to storage
//! - A record lives until the token would have expired, never less than the
//!   configured minimum TTL
//! - Lookups are fail-closed: a registry error rejects the request
//!
//! # Implementations
//!
//! - [`InMemoryRevocationRegistry`] - single-instance deployments and tests
//! - `gateway-auth-redis` - shared Redis registry

mod memory;

pub use memory::InMemoryRevocationRegistry;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::config::RevocationConfig;

/// Registry lookup key: lowercase hex SHA-256 of the raw token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevocationKey(String);

impl RevocationKey {
    /// Derives the key for `raw_token`.
    #[must_use]
    pub fn from_token(raw_token: &str) -> Self {
        Self(hex::encode(Sha256::digest(raw_token.as_bytes())))
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors returned by revocation registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RevocationError {
    /// The backing store failed.
    #[error("Revocation registry error: {0}")]
    Backend(String),

    /// The call did not complete within the registry timeout.
    #[error("Revocation registry call timed out after {0:?}")]
    Timeout(Duration),
}

impl RevocationError {
    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Store of revoked token digests.
#[async_trait]
pub trait RevocationRegistry: Send + Sync {
    /// Returns `true` if `key` has been recorded and its TTL has not elapsed.
    async fn exists(&self, key: &RevocationKey) -> Result<bool, RevocationError>;

    /// Records `key` as revoked for `ttl`.
    ///
    /// Recording an already-revoked key succeeds.
    async fn record(&self, key: &RevocationKey, ttl: Duration) -> Result<(), RevocationError>;
}

/// TTL for a revocation record.
///
/// Time until `expires_at`, floored at `config.min_ttl`; `config.default_ttl`
/// when the expiry is unknown.
#[must_use]
pub fn revocation_ttl(
    expires_at: Option<OffsetDateTime>,
    now: OffsetDateTime,
    config: &RevocationConfig,
) -> Duration {
    match expires_at {
        None => config.default_ttl,
        Some(expires_at) => Duration::try_from(expires_at - now)
            .unwrap_or(Duration::ZERO)
            .max(config.min_ttl),
    }
}

/// Runs a registry call under `timeout`.
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, RevocationError>>,
) -> Result<T, RevocationError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(RevocationError::Timeout(timeout)))
}
