//! RS256 access token verification.
//!
//! Checks run in a fixed order and nothing from the payload is looked at
//! before the signature has been verified:
//!
//! 1. split the token and decode the header without trusting it
//! 2. require `alg == "RS256"`
//! 3. require a `kid`
//! 4. resolve the key from the [`KeySetCache`]
//! 5. verify the signature
//! 6. validate `iss`, `exp`, `sub` and `token_type`

use std::collections::HashSet;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;
use time::OffsetDateTime;

use super::claims::{ACCESS_TOKEN_TYPE, Claims, RawClaims, TokenType};
use crate::error::AuthError;
use crate::key_set::{KeyMaterial, KeySetCache, KeySetError};

/// The one accepted signing algorithm.
pub const ACCEPTED_ALGORITHM: &str = "RS256";

/// Untrusted token header fields.
#[derive(Debug, Default, Deserialize)]
struct RawHeader {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<String>,
}

/// Header fields that passed the algorithm and kid checks.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CheckedHeader {
    kid: String,
}

/// Verifies bearer tokens against the trusted key set.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: KeySetCache,
    leeway: Duration,
    validation: Validation,
}

impl TokenVerifier {
    /// Creates a verifier backed by `keys`.
    #[must_use]
    pub fn new(keys: KeySetCache) -> Self {
        // Claims are validated by hand after the signature check.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        Self {
            keys,
            leeway: Duration::ZERO,
            validation,
        }
    }

    /// Sets the clock skew tolerated on `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// The key-set cache used for key resolution.
    #[must_use]
    pub fn key_set(&self) -> &KeySetCache {
        &self.keys
    }

    /// Verifies `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// - `UnsupportedAlgorithm` unless the header declares RS256
    /// - `UnknownSigningKey` if the header has no `kid` or the kid is not trusted
    /// - `SignatureInvalid` if the signature does not verify
    /// - `ClaimInvalid` for a wrong issuer, missing/past expiry, empty subject
    ///   or a token type other than `access`
    /// - `MissingOrMalformedHeader` if the token is not a three-part JWS
    /// - `BackendUnavailable` if the key set cannot be loaded at all
    pub async fn verify(&self, token: &str, expected_issuer: &str) -> Result<Claims, AuthError> {
        let header = check_header(token)?;
        let key = self.resolve_key(&header.kid).await?;
        let raw = self.verify_signature(token, &key)?;
        validate_claims(raw, header.kid, expected_issuer, OffsetDateTime::now_utc(), self.leeway)
    }

    async fn resolve_key(&self, kid: &str) -> Result<std::sync::Arc<KeyMaterial>, AuthError> {
        self.keys.resolve(kid).await.map_err(|err| match err {
            KeySetError::KeyNotFound(kid) => AuthError::unknown_key(kid),
            other => AuthError::key_set_unavailable(other.to_string()),
        })
    }

    fn verify_signature(&self, token: &str, key: &KeyMaterial) -> Result<RawClaims, AuthError> {
        jsonwebtoken::decode::<RawClaims>(token, key.decoding_key(), &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                    AuthError::malformed("token is not a valid JWS")
                }
                ErrorKind::Json(e) => AuthError::claim("payload", e.to_string()),
                _ => {
                    tracing::debug!(error = %err, "Signature check failed");
                    AuthError::SignatureInvalid
                }
            })
    }
}

/// Decodes the header and applies the algorithm and kid checks.
fn check_header(token: &str) -> Result<CheckedHeader, AuthError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthError::malformed("token must have three segments"));
    };
    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(AuthError::malformed("token has an empty segment"));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| AuthError::malformed("token header is not base64url"))?;
    let header: RawHeader = serde_json::from_slice(&header_bytes)
        .map_err(|_| AuthError::malformed("token header is not a JSON object"))?;

    match header.alg.as_deref() {
        Some(ACCEPTED_ALGORITHM) => {}
        Some(other) => return Err(AuthError::unsupported_algorithm(other)),
        None => return Err(AuthError::unsupported_algorithm("<none>")),
    }

    let kid = header
        .kid
        .filter(|kid| !kid.trim().is_empty())
        .ok_or_else(|| AuthError::unknown_key("<none>"))?;

    Ok(CheckedHeader { kid })
}

/// Validates claims of a token whose signature has already been verified.
fn validate_claims(
    raw: RawClaims,
    key_id: String,
    expected_issuer: &str,
    now: OffsetDateTime,
    leeway: Duration,
) -> Result<Claims, AuthError> {
    let issuer = raw
        .iss
        .filter(|iss| iss == expected_issuer)
        .ok_or_else(|| AuthError::claim("iss", "issuer does not match"))?;

    let exp = raw
        .exp
        .ok_or_else(|| AuthError::claim("exp", "missing expiry"))?;
    let expires_at = OffsetDateTime::from_unix_timestamp(exp)
        .map_err(|_| AuthError::claim("exp", "expiry out of range"))?;
    // A deadline past the representable range never expires.
    let expired = time::Duration::try_from(leeway)
        .ok()
        .and_then(|leeway| expires_at.checked_add(leeway))
        .is_some_and(|deadline| deadline <= now);
    if expired {
        return Err(AuthError::claim("exp", "token expired"));
    }

    let subject = raw
        .sub
        .filter(|sub| !sub.trim().is_empty())
        .ok_or_else(|| AuthError::claim("sub", "missing subject"))?;

    let token_type = raw
        .token_type
        .as_deref()
        .map(TokenType::from_claim)
        .ok_or_else(|| AuthError::claim("token_type", "missing token type"))?;
    if token_type != TokenType::Access {
        return Err(AuthError::claim(
            "token_type",
            format!("expected '{ACCESS_TOKEN_TYPE}', got '{token_type}'"),
        ));
    }

    Ok(Claims {
        subject,
        expires_at,
        issuer,
        token_type,
        key_id,
        issued_at: raw
            .iat
            .and_then(|iat| OffsetDateTime::from_unix_timestamp(iat).ok()),
        token_id: raw.jti,
        username: raw.username,
    })
}
