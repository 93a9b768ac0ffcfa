use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::DecodingKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::KeySetError;

// =============================================================================
// Raw Provider Entries
// =============================================================================

/// A key entry as published by the key-set provider (JWK subset).
///
/// Nothing in an entry is trusted until [`KeyMaterial::from_jwk`] accepts it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkEntry {
    /// Key id.
    #[serde(default)]
    pub kid: Option<String>,

    /// Key type. Only `RSA` is usable.
    #[serde(default)]
    pub kty: String,

    /// RSA modulus, base64url without padding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent, base64url without padding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// Intended key use (`sig` / `enc`).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Intended algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

impl JwkEntry {
    /// Creates an RSA signing entry from base64url-encoded components.
    #[must_use]
    pub fn rsa(kid: impl Into<String>, n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            kid: Some(kid.into()),
            kty: "RSA".to_string(),
            n: Some(n.into()),
            e: Some(e.into()),
            key_use: Some("sig".to_string()),
            alg: Some("RS256".to_string()),
        }
    }

    fn is_signing_rsa(&self) -> bool {
        self.kty == "RSA"
            && self.key_use.as_deref().is_none_or(|u| u == "sig")
            && self.alg.as_deref().is_none_or(|a| a == "RS256")
    }
}

// =============================================================================
// Key Material
// =============================================================================

/// A verified RSA public key bound to a key id.
///
/// Immutable once constructed.
pub struct KeyMaterial {
    kid: String,
    public_key: RsaPublicKey,
    decoding_key: DecodingKey,
}

impl KeyMaterial {
    /// Parses an RSA key entry.
    ///
    /// Modulus and exponent are decoded from unpadded base64url into a
    /// positive integer pair and checked as an RSA public key.
    ///
    /// # Errors
    ///
    /// Returns `KeySetError::InvalidKey` if the entry is not an RSA key, has
    /// no `kid`, or its components do not decode to a valid public key.
    pub fn from_jwk(entry: &JwkEntry) -> Result<Self, KeySetError> {
        let kid = entry
            .kid
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| KeySetError::invalid_key("<none>", "missing kid"))?
            .to_string();

        if entry.kty != "RSA" {
            return Err(KeySetError::invalid_key(
                &kid,
                format!("unsupported key type '{}'", entry.kty),
            ));
        }

        let n = decode_component(&kid, "n", entry.n.as_deref())?;
        let e = decode_component(&kid, "e", entry.e.as_deref())?;

        let public_key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|err| KeySetError::invalid_key(&kid, err.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_raw_components(&n, &e);

        Ok(Self {
            kid,
            public_key,
            decoding_key,
        })
    }

    /// Key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The validated RSA public key.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Modulus size in bits.
    #[must_use]
    pub fn bits(&self) -> usize {
        self.public_key.n().bits()
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kid", &self.kid)
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

fn decode_component(kid: &str, name: &str, value: Option<&str>) -> Result<Vec<u8>, KeySetError> {
    let value = value.ok_or_else(|| KeySetError::invalid_key(kid, format!("missing '{name}'")))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|err| KeySetError::invalid_key(kid, format!("invalid '{name}': {err}")))?;
    if bytes.iter().all(|b| *b == 0) {
        return Err(KeySetError::invalid_key(
            kid,
            format!("'{name}' must be a positive integer"),
        ));
    }
    Ok(bytes)
}

// =============================================================================
// Snapshot
// =============================================================================

/// An immutable, fully-parsed set of trusted keys.
///
/// Always holds at least one key. Replaced as a whole on refresh.
#[derive(Debug)]
pub struct KeySetSnapshot {
    keys: Vec<Arc<KeyMaterial>>,
    fetched_at: Instant,
}

impl KeySetSnapshot {
    /// Builds a snapshot from provider entries.
    ///
    /// Entries that are not RSA signing keys are skipped. Entries that fail
    /// to decode are dropped and logged. Duplicate key ids keep the first
    /// occurrence.
    ///
    /// # Errors
    ///
    /// Returns `KeySetError::NoUsableKeys` if no entry survives.
    pub fn from_entries(entries: &[JwkEntry], fetched_at: Instant) -> Result<Self, KeySetError> {
        let mut keys: Vec<Arc<KeyMaterial>> = Vec::with_capacity(entries.len());

        for entry in entries {
            if !entry.is_signing_rsa() {
                tracing::debug!(
                    kid = entry.kid.as_deref().unwrap_or("<none>"),
                    kty = %entry.kty,
                    "Skipping non RS256 signing key"
                );
                continue;
            }

            match KeyMaterial::from_jwk(entry) {
                Ok(material) if keys.iter().any(|k| k.kid == material.kid) => {
                    tracing::warn!(kid = %material.kid, "Duplicate kid in key set, keeping first");
                }
                Ok(material) => keys.push(Arc::new(material)),
                Err(err) => {
                    tracing::warn!(error = %err, "Dropping undecodable key entry");
                }
            }
        }

        if keys.is_empty() {
            return Err(KeySetError::NoUsableKeys);
        }

        Ok(Self { keys, fetched_at })
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Arc<KeyMaterial>> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Key ids in provider order.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.kid.as_str())
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always `false`; kept for clippy's `len_without_is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// When the snapshot was fetched.
    #[must_use]
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Returns `true` once the snapshot is older than `ttl`.
    #[must_use]
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) > ttl
    }
}
