//! Authentication error types.
//!
//! Every variant of [`AuthError`] is rendered to the caller as the same
//! generic `401 Unauthorized` response. The variants exist so that logs can
//! tell a bad credential apart from an unhealthy backend.

use std::fmt;

/// Reasons a request can be rejected by the authentication flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The `Authorization` header is absent, not a bearer credential, or the
    /// token is not structurally a JWT.
    #[error("Missing or malformed credential: {message}")]
    MissingOrMalformedHeader {
        /// What was wrong with the credential.
        message: String,
    },

    /// The token references a key id that is not in the trusted key set.
    #[error("Unknown signing key: {kid}")]
    UnknownSigningKey {
        /// The key id declared by the token header.
        kid: String,
    },

    /// The token declares an algorithm other than RS256.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        /// The declared algorithm, or `<none>` when absent.
        algorithm: String,
    },

    /// The signature does not verify against the resolved key.
    #[error("Signature verification failed")]
    SignatureInvalid,

    /// A claim failed validation after the signature was accepted.
    #[error("Invalid claim `{claim}`: {message}")]
    ClaimInvalid {
        /// Claim name (`iss`, `exp`, `sub`, `token_type`, ...).
        claim: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The token digest is present in the revocation registry.
    #[error("Token revoked")]
    Revoked,

    /// The key-set provider or revocation registry failed or timed out.
    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable {
        /// Which collaborator failed.
        backend: Backend,
        /// Description of the failure.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `MissingOrMalformedHeader` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MissingOrMalformedHeader {
            message: message.into(),
        }
    }

    /// Creates a new `UnknownSigningKey` error.
    #[must_use]
    pub fn unknown_key(kid: impl Into<String>) -> Self {
        Self::UnknownSigningKey { kid: kid.into() }
    }

    /// Creates a new `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Creates a new `ClaimInvalid` error.
    #[must_use]
    pub fn claim(claim: &'static str, message: impl Into<String>) -> Self {
        Self::ClaimInvalid {
            claim,
            message: message.into(),
        }
    }

    /// Creates a new `BackendUnavailable` error for the key-set provider.
    #[must_use]
    pub fn key_set_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: Backend::KeySet,
            message: message.into(),
        }
    }

    /// Creates a new `BackendUnavailable` error for the revocation registry.
    #[must_use]
    pub fn revocation_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: Backend::Revocation,
            message: message.into(),
        }
    }

    /// Returns `true` when the rejection was caused by infrastructure
    /// rather than by the presented credential.
    #[must_use]
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Returns the error category for logging/alerting purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BackendUnavailable { .. } => ErrorCategory::Backend,
            _ => ErrorCategory::Credential,
        }
    }

    /// Short machine-friendly reason used as a log field.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingOrMalformedHeader { .. } => "missing_or_malformed_header",
            Self::UnknownSigningKey { .. } => "unknown_signing_key",
            Self::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            Self::SignatureInvalid => "signature_invalid",
            Self::ClaimInvalid { .. } => "claim_invalid",
            Self::Revoked => "revoked",
            Self::BackendUnavailable { .. } => "backend_unavailable",
        }
    }
}

/// External collaborator that can make a request fail closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The signing key-set provider.
    KeySet,
    /// The revocation registry.
    Revocation,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeySet => write!(f, "key_set"),
            Self::Revocation => write!(f, "revocation"),
        }
    }
}

/// Error categories for logging and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The presented credential is invalid.
    Credential,
    /// Infrastructure degradation.
    Backend,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential => write!(f, "credential"),
            Self::Backend => write!(f, "backend"),
        }
    }
}
