//! Identity attached to admitted requests.

use std::fmt;

use time::OffsetDateTime;

use crate::revocation::RevocationKey;

/// Identity of an admitted request.
///
/// Inserted into the request extensions by [`super::require_auth`] and
/// read-only afterwards. The raw token is kept so the request can revoke
/// itself (logout); it is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    subject: String,
    expires_at: OffsetDateTime,
    raw_token: String,
}

impl VerifiedIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(subject: String, expires_at: OffsetDateTime, raw_token: String) -> Self {
        Self {
            subject,
            expires_at,
            raw_token,
        }
    }

    /// Verified subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Token expiry.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// The bearer token as presented.
    #[must_use]
    pub fn raw_token(&self) -> &str {
        &self.raw_token
    }

    /// Registry key for this token.
    #[must_use]
    pub fn revocation_key(&self) -> RevocationKey {
        RevocationKey::from_token(&self.raw_token)
    }
}

impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("subject", &self.subject)
            .field("expires_at", &self.expires_at)
            .field("raw_token", &"<redacted>")
            .finish()
    }
}
