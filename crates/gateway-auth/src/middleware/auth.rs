//! Bearer token authentication middleware.
//!
//! Each request runs the following machine exactly once:
//!
//! ```text
//! Start → TokenExtracted → RevocationChecked → KeyResolved
//!       → SignatureVerified → ClaimsValidated → Admitted
//! ```
//!
//! Any state may move to rejected. Rejections are answered with the same
//! generic 401; the stage and reason only go to the logs.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use gateway_auth::middleware::{Authenticated, require_auth};
//!
//! async fn profile(Authenticated(identity): Authenticated) -> String {
//!     identity.subject().to_string()
//! }
//!
//! let app = Router::new()
//!     .route("/v1/user/profile", get(profile))
//!     .route_layer(middleware::from_fn_with_state(auth_state.clone(), require_auth))
//!     .with_state(auth_state);
//! ```

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;

use super::types::VerifiedIdentity;
use crate::config::{AuthConfig, RevocationConfig};
use crate::error::AuthError;
use crate::key_set::{KeySetCache, KeySetProvider};
use crate::revocation::{
    RevocationError, RevocationKey, RevocationRegistry, revocation_ttl, with_timeout,
};
use crate::token::TokenVerifier;

// =============================================================================
// Auth Stage
// =============================================================================

/// Progress of a single request through the authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Nothing checked yet.
    Start,
    /// A bearer token was read from the `Authorization` header.
    TokenExtracted,
    /// The token is not in the revocation registry.
    RevocationChecked,
    /// The signing key was found in the trusted key set.
    KeyResolved,
    /// The signature verified.
    SignatureVerified,
    /// Issuer, expiry, subject and token type are valid.
    ClaimsValidated,
    /// The request was handed to the next handler.
    Admitted,
}

impl AuthStage {
    /// Last stage reached when the verifier fails with `error`.
    fn reached_before(error: &AuthError) -> Self {
        match error {
            AuthError::SignatureInvalid => Self::KeyResolved,
            AuthError::ClaimInvalid { .. } => Self::SignatureVerified,
            _ => Self::RevocationChecked,
        }
    }
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::TokenExtracted => "token_extracted",
            Self::RevocationChecked => "revocation_checked",
            Self::KeyResolved => "key_resolved",
            Self::SignatureVerified => "signature_verified",
            Self::ClaimsValidated => "claims_validated",
            Self::Admitted => "admitted",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Auth State
// =============================================================================

/// State required by [`require_auth`] and the logout handler.
///
/// Cheap to clone; include it in the application state and expose it with
/// `FromRef` if the router state is a larger struct.
#[derive(Clone)]
pub struct AuthState {
    /// Token verifier (owns the key-set cache).
    pub verifier: Arc<TokenVerifier>,

    /// Revocation registry.
    pub revocation: Arc<dyn RevocationRegistry>,

    /// Expected token issuer.
    pub issuer: Arc<str>,

    /// Registry timeout and record TTLs.
    pub revocation_config: RevocationConfig,
}

impl AuthState {
    /// Creates an auth state from its parts.
    pub fn new(
        verifier: Arc<TokenVerifier>,
        revocation: Arc<dyn RevocationRegistry>,
        issuer: impl Into<Arc<str>>,
        revocation_config: RevocationConfig,
    ) -> Self {
        Self {
            verifier,
            revocation,
            issuer: issuer.into(),
            revocation_config,
        }
    }

    /// Builds the key-set cache and verifier from configuration.
    pub fn from_config(
        config: &AuthConfig,
        provider: Arc<dyn KeySetProvider>,
        revocation: Arc<dyn RevocationRegistry>,
    ) -> Self {
        let keys = KeySetCache::new(provider, &config.key_set);
        let verifier = TokenVerifier::new(keys).with_leeway(config.leeway);
        Self::new(
            Arc::new(verifier),
            revocation,
            config.issuer.as_str(),
            config.revocation.clone(),
        )
    }

    /// The key-set cache behind the verifier.
    #[must_use]
    pub fn key_set(&self) -> &KeySetCache {
        self.verifier.key_set()
    }

    /// Runs the authentication flow against request headers.
    ///
    /// The rejection is logged here; callers only need to turn the error
    /// into a response.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`]; all of them must be answered with the same 401.
    #[tracing::instrument(name = "auth.authenticate", skip_all)]
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<VerifiedIdentity, AuthError> {
        let token = bearer_token(headers).map_err(|e| reject(AuthStage::Start, e))?;

        let key = RevocationKey::from_token(&token);
        match with_timeout(self.revocation_config.timeout, self.revocation.exists(&key)).await {
            Ok(false) => {}
            Ok(true) => return Err(reject(AuthStage::TokenExtracted, AuthError::Revoked)),
            Err(e) => {
                return Err(reject(
                    AuthStage::TokenExtracted,
                    AuthError::revocation_unavailable(e.to_string()),
                ));
            }
        }

        let claims = self
            .verifier
            .verify(&token, &self.issuer)
            .await
            .map_err(|e| reject(AuthStage::reached_before(&e), e))?;

        tracing::debug!(
            subject = %claims.subject,
            kid = %claims.key_id,
            stage = %AuthStage::Admitted,
            "Token validated successfully"
        );

        Ok(VerifiedIdentity::new(claims.subject, claims.expires_at, token))
    }

    /// Records the identity's token as revoked until it expires.
    ///
    /// Returns the TTL that was recorded.
    ///
    /// # Errors
    ///
    /// Returns the registry error, including a timeout; the token must then
    /// be considered still valid.
    pub async fn revoke(&self, identity: &VerifiedIdentity) -> Result<Duration, RevocationError> {
        // Verified tokens always carry `exp`; `default_ttl` is for callers of
        // `revocation_ttl` that revoke without knowing the expiry.
        let ttl = revocation_ttl(
            Some(identity.expires_at()),
            OffsetDateTime::now_utc(),
            &self.revocation_config,
        );
        let key = identity.revocation_key();

        with_timeout(self.revocation_config.timeout, self.revocation.record(&key, ttl)).await?;

        tracing::info!(subject = %identity.subject(), ttl = ?ttl, "Token revoked");
        Ok(ttl)
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("issuer", &self.issuer)
            .field("key_set", self.verifier.key_set())
            .finish_non_exhaustive()
    }
}

fn reject(stage: AuthStage, error: AuthError) -> AuthError {
    if let AuthError::BackendUnavailable { backend, .. } = &error {
        tracing::warn!(
            stage = %stage,
            backend = %backend,
            error = %error,
            "Rejecting request: backend unavailable"
        );
    } else {
        tracing::debug!(
            stage = %stage,
            reason = error.reason(),
            error = %error,
            "Rejecting request"
        );
    }
    error
}

/// Extracts the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively and the token is trimmed.
fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AuthError::malformed("missing Authorization header"))?
        .to_str()
        .map_err(|_| AuthError::malformed("Authorization header is not visible ASCII"))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| AuthError::malformed("invalid Authorization header"))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::malformed("Authorization scheme is not Bearer"));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::malformed("empty Bearer token"));
    }
    Ok(token.to_string())
}

// =============================================================================
// Middleware
// =============================================================================

/// Axum middleware that admits or rejects the request.
///
/// On admission the [`VerifiedIdentity`] is inserted into the request
/// extensions and the next handler runs in the same task.
pub async fn require_auth(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.authenticate(request.headers()).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

// =============================================================================
// Extractors
// =============================================================================

/// Extractor for the identity attached by [`require_auth`].
///
/// Rejects with the generic 401 if the route is not behind the middleware.
#[derive(Debug, Clone)]
pub struct Authenticated(pub VerifiedIdentity);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<VerifiedIdentity>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AuthError::malformed("request has no verified identity"))
    }
}

/// Extractor for an identity that may be absent.
#[derive(Debug, Clone)]
pub struct OptionalIdentity(pub Option<VerifiedIdentity>);

impl<S> FromRequestParts<S> for OptionalIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<VerifiedIdentity>().cloned()))
    }
}
