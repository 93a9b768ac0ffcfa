//! Authentication configuration.
//!
//! Covers the expected token issuer, the signing key-set cache and the
//! revocation registry timeouts/TTLs.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Root authentication configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "astraios-auth"
///
/// [auth.key_set]
/// url = "https://auth.internal/.well-known/jwks.json"
/// cache_ttl = "5m"
/// fetch_timeout = "5s"
///
/// [auth.revocation]
/// timeout = "2s"
/// min_ttl = "1m"
/// default_ttl = "24h"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Expected value of the token `iss` claim.
    pub issuer: String,

    /// Clock skew tolerated when checking `exp`.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,

    /// Signing key-set cache configuration.
    pub key_set: KeySetConfig,

    /// Revocation registry configuration.
    pub revocation: RevocationConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "astraios-auth".to_string(),
            leeway: Duration::ZERO,
            key_set: KeySetConfig::default(),
            revocation: RevocationConfig::default(),
        }
    }
}

/// Signing key-set cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeySetConfig {
    /// JWKS endpoint of the token issuer.
    /// Only used by [`crate::key_set::HttpKeySetProvider`].
    pub url: Option<Url>,

    /// How long a fetched key set is trusted before it is refreshed.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Upper bound on a single key-set fetch.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Minimum delay between refresh attempts after a failed refresh
    /// while the previous snapshot is still being served.
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Maximum accepted JWKS response size in bytes.
    pub max_response_size: usize,

    /// Allow plain `http` JWKS URLs (local development only).
    pub allow_http: bool,
}

impl Default for KeySetConfig {
    fn default() -> Self {
        Self {
            url: None,
            cache_ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_secs(10),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl KeySetConfig {
    /// Sets the cache TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the fetch timeout.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the retry interval used after failed refreshes.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Allows plain HTTP JWKS URLs.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Revocation registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Upper bound on a single registry call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Floor for the TTL of a revocation record.
    #[serde(with = "humantime_serde")]
    pub min_ttl: Duration,

    /// TTL used when the token expiry is unknown.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            min_ttl: Duration::from_secs(60),
            default_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the issuer is empty, and
    /// `ConfigError::InvalidValue` if:
    /// - The cache TTL or any timeout is zero
    /// - The revocation minimum TTL is below one second
    /// - The revocation default TTL is below the minimum TTL
    /// - The JWKS URL scheme is not https (unless `allow_http`)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("auth.issuer".to_string()));
        }

        if self.key_set.cache_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "key_set.cache_ttl must be > 0".to_string(),
            ));
        }

        if self.key_set.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "key_set.fetch_timeout must be > 0".to_string(),
            ));
        }

        if self.key_set.max_response_size == 0 {
            return Err(ConfigError::InvalidValue(
                "key_set.max_response_size must be > 0".to_string(),
            ));
        }

        if let Some(url) = &self.key_set.url {
            match url.scheme() {
                "https" => {}
                "http" if self.key_set.allow_http => {}
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "key_set.url scheme '{}' is not allowed",
                        other
                    )));
                }
            }
        }

        if self.revocation.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "revocation.timeout must be > 0".to_string(),
            ));
        }

        if self.revocation.min_ttl < Duration::from_secs(1) {
            return Err(ConfigError::InvalidValue(
                "revocation.min_ttl must be at least 1s".to_string(),
            ));
        }

        if self.revocation.default_ttl < self.revocation.min_ttl {
            return Err(ConfigError::InvalidValue(
                "revocation.default_ttl must be >= revocation.min_ttl".to_string(),
            ));
        }

        Ok(())
    }
}
