//! Trusted signing keys.
//!
//! - [`KeyMaterial`] - a parsed RSA public key bound to its `kid`
//! - [`KeySetSnapshot`] - an immutable, fully-parsed set of keys
//! - [`KeySetProvider`] - where raw key entries come from
//! - [`KeySetCache`] - TTL cache with single-flight refresh and
//!   stale-snapshot fallback

mod cache;
mod material;
mod provider;

pub use cache::{CacheStatus, KeySetCache};
pub use material::{JwkEntry, KeyMaterial, KeySetSnapshot};
pub use provider::{HttpKeySetProvider, KeySetProvider};

use std::time::Duration;

/// Errors that can occur while fetching, parsing or resolving signing keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeySetError {
    /// The provider could not be reached or returned an unusable response.
    #[error("Key-set provider error: {0}")]
    Provider(String),

    /// The provider returned a non-success HTTP status.
    #[error("Key-set provider returned HTTP {0}")]
    HttpStatus(u16),

    /// The provider did not answer within the fetch timeout.
    #[error("Key-set fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The JWKS response exceeded the configured maximum size.
    #[error("Key-set response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },

    /// The JWKS URL scheme is not allowed.
    #[error("Invalid key-set URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    /// A single key entry could not be decoded.
    #[error("Invalid key `{kid}`: {message}")]
    InvalidKey {
        /// The entry's key id.
        kid: String,
        /// Why the entry was rejected.
        message: String,
    },

    /// The provider response held no usable RSA key.
    #[error("Key set contains no usable RSA keys")]
    NoUsableKeys,

    /// The requested key id is not in the current snapshot.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The refresh task ended without producing a result.
    #[error("Key-set refresh aborted: {0}")]
    RefreshAborted(String),
}

impl KeySetError {
    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(kid: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKey {
            kid: kid.into(),
            message: message.into(),
        }
    }
}
