//! Key-set providers.
//!
//! The cache only needs a list of raw key entries; where they come from
//! (HTTPS JWKS endpoint, RPC, static file) is behind [`KeySetProvider`].

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{JwkEntry, KeySetError};
use crate::config::KeySetConfig;

/// Source of the issuer's current signing keys.
///
/// Implementations perform a single fetch per call and must not cache;
/// caching and refresh policy live in [`super::KeySetCache`].
#[async_trait]
pub trait KeySetProvider: Send + Sync {
    /// Fetches the raw key entries.
    async fn fetch(&self) -> Result<Vec<JwkEntry>, KeySetError>;
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    #[serde(default)]
    keys: Vec<JwkEntry>,
}

/// Fetches a JWKS document (`{"keys": [...]}`) over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpKeySetProvider {
    http_client: reqwest::Client,
    url: Url,
    max_response_size: usize,
}

impl HttpKeySetProvider {
    /// Creates a provider for `url`.
    ///
    /// # Errors
    ///
    /// Returns `KeySetError::InvalidScheme` if `url` is not https (or http
    /// with `allow_http`), and `KeySetError::Provider` if the HTTP client
    /// cannot be built.
    pub fn new(url: Url, config: &KeySetConfig) -> Result<Self, KeySetError> {
        validate_scheme(&url, config.allow_http)?;

        let http_client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| KeySetError::Provider(e.to_string()))?;

        Ok(Self {
            http_client,
            url,
            max_response_size: config.max_response_size,
        })
    }

    /// Creates a provider from `config.url`.
    ///
    /// # Errors
    ///
    /// Returns `KeySetError::Provider` if no URL is configured, otherwise the
    /// errors of [`HttpKeySetProvider::new`].
    pub fn from_config(config: &KeySetConfig) -> Result<Self, KeySetError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| KeySetError::Provider("key_set.url is not configured".to_string()))?;
        Self::new(url, config)
    }

    /// The JWKS endpoint.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl KeySetProvider for HttpKeySetProvider {
    async fn fetch(&self) -> Result<Vec<JwkEntry>, KeySetError> {
        tracing::debug!(url = %self.url, "Fetching JWKS");

        let mut response = self
            .http_client
            .get(self.url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %self.url, error = %e, "Failed to fetch JWKS");
                KeySetError::Provider(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(KeySetError::HttpStatus(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_response_size
        {
            return Err(KeySetError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        // Chunked responses carry no length, so the cap is enforced while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| KeySetError::Provider(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_response_size {
                return Err(KeySetError::ResponseTooLarge {
                    max_size: self.max_response_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let document: JwksDocument = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(url = %self.url, error = %e, "Failed to parse JWKS");
            KeySetError::Provider(format!("invalid JWKS document: {e}"))
        })?;

        Ok(document.keys)
    }
}

fn validate_scheme(url: &Url, allow_http: bool) -> Result<(), KeySetError> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_http => Ok(()),
        _ => Err(KeySetError::InvalidScheme),
    }
}
