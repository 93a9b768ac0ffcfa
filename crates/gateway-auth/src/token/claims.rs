//! Token claims.

use std::fmt;

use serde::Deserialize;
use time::OffsetDateTime;

/// The only token type admitted by the gateway.
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Value of the `token_type` claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenType {
    /// Short-lived access token.
    Access,
    /// Refresh token; structurally valid but never admitted.
    Refresh,
    /// Anything else.
    Other(String),
}

impl TokenType {
    /// Parses a `token_type` claim value.
    #[must_use]
    pub fn from_claim(value: &str) -> Self {
        match value {
            ACCESS_TOKEN_TYPE => Self::Access,
            "refresh" => Self::Refresh,
            other => Self::Other(other.to_string()),
        }
    }

    /// Claim value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Access => ACCESS_TOKEN_TYPE,
            Self::Refresh => "refresh",
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of a verified access token.
///
/// Only produced by [`super::TokenVerifier`] after the signature has been
/// checked against a trusted key and every required claim has been
/// validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (`sub`), never empty.
    pub subject: String,
    /// Expiry (`exp`), in the future at verification time.
    pub expires_at: OffsetDateTime,
    /// Issuer (`iss`), equal to the expected issuer.
    pub issuer: String,
    /// Token type (`token_type`), always [`TokenType::Access`].
    pub token_type: TokenType,
    /// Key id from the token header.
    pub key_id: String,
    /// Issued-at (`iat`), if present.
    pub issued_at: Option<OffsetDateTime>,
    /// Token id (`jti`), if present.
    pub token_id: Option<String>,
    /// Username claim set by the issuer, if present.
    pub username: Option<String>,
}

/// Untrusted payload as decoded from the token. Every field is optional
/// until validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}
