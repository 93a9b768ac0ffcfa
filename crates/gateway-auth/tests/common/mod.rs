//! Shared fixtures: RSA signing keys, token builders, scripted key-set
//! providers and revocation registries.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::AUTHORIZATION},
    middleware,
    response::Response,
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use gateway_auth::{
    AuthConfig, AuthState, Authenticated, InMemoryRevocationRegistry, JwkEntry, KeySetError,
    KeySetProvider, RevocationError, RevocationKey, RevocationRegistry, logout_handler,
    require_auth,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use time::OffsetDateTime;

pub const ISSUER: &str = "svc";

// =============================================================================
// Signing keys
// =============================================================================

pub struct TestKey {
    pub kid: String,
    pub public_pem: String,
    encoding_key: EncodingKey,
    n: String,
    e: String,
}

impl TestKey {
    fn generate(kid: &str) -> Self {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("generate RSA key");
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("encode private key");
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .expect("encode public key");

        Self {
            kid: kid.to_string(),
            public_pem,
            encoding_key: EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .expect("load encoding key"),
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }
    }

    /// JWK entry publishing this key under its own kid.
    pub fn jwk(&self) -> JwkEntry {
        self.jwk_as(&self.kid)
    }

    /// JWK entry publishing this key under another kid.
    pub fn jwk_as(&self, kid: &str) -> JwkEntry {
        JwkEntry::rsa(kid, &self.n, &self.e)
    }

    /// Signs `claims` with RS256 and this key's kid.
    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_kid(Some(&self.kid), claims)
    }

    pub fn sign_with_kid(&self, kid: Option<&str>, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(ToString::to_string);
        jsonwebtoken::encode(&header, claims, &self.encoding_key).expect("sign token")
    }
}

pub static KEY_A: LazyLock<TestKey> = LazyLock::new(|| TestKey::generate("A"));
pub static KEY_B: LazyLock<TestKey> = LazyLock::new(|| TestKey::generate("B"));

/// Claims of a valid access token expiring in five minutes.
pub fn access_claims(subject: &str) -> Value {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    json!({
        "sub": subject,
        "iss": ISSUER,
        "iat": now,
        "exp": now + 300,
        "token_type": "access",
        "username": "alice",
    })
}

/// Token signed with HS256 using `secret`, with the given kid.
pub fn hs256_token(kid: &str, secret: &[u8], claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret)).expect("sign token")
}

/// Token with an arbitrary header and a garbage signature.
pub fn raw_token(header: &Value, claims: &Value) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap()),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap()),
        URL_SAFE_NO_PAD.encode(b"not-a-signature"),
    )
}

// =============================================================================
// Key-set provider
// =============================================================================

pub struct TestProvider {
    calls: AtomicUsize,
    keys: Mutex<Vec<JwkEntry>>,
    failing: AtomicBool,
    delay: Duration,
}

impl TestProvider {
    pub fn new(keys: Vec<JwkEntry>) -> Arc<Self> {
        Self::with_delay(keys, Duration::ZERO)
    }

    pub fn with_delay(keys: Vec<JwkEntry>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            keys: Mutex::new(keys),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    pub fn set_keys(&self, keys: Vec<JwkEntry>) {
        *self.keys.lock().unwrap() = keys;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetProvider for TestProvider {
    async fn fetch(&self) -> Result<Vec<JwkEntry>, KeySetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(KeySetError::Provider("auth-service unavailable".to_string()));
        }
        Ok(self.keys.lock().unwrap().clone())
    }
}

// =============================================================================
// Revocation registries
// =============================================================================

/// Registry whose calls never complete.
pub struct StallingRegistry;

#[async_trait]
impl RevocationRegistry for StallingRegistry {
    async fn exists(&self, _key: &RevocationKey) -> Result<bool, RevocationError> {
        std::future::pending().await
    }

    async fn record(&self, _key: &RevocationKey, _ttl: Duration) -> Result<(), RevocationError> {
        std::future::pending().await
    }
}

/// Registry that always errors.
pub struct BrokenRegistry;

#[async_trait]
impl RevocationRegistry for BrokenRegistry {
    async fn exists(&self, _key: &RevocationKey) -> Result<bool, RevocationError> {
        Err(RevocationError::backend("connection reset"))
    }

    async fn record(&self, _key: &RevocationKey, _ttl: Duration) -> Result<(), RevocationError> {
        Err(RevocationError::backend("connection reset"))
    }
}

// =============================================================================
// Auth state and router
// =============================================================================

pub fn test_config() -> AuthConfig {
    let mut config = AuthConfig {
        issuer: ISSUER.to_string(),
        ..AuthConfig::default()
    };
    config.key_set.cache_ttl = Duration::from_secs(300);
    config.revocation.timeout = Duration::from_millis(200);
    config
}

pub fn auth_state(
    provider: Arc<TestProvider>,
    registry: Arc<dyn RevocationRegistry>,
) -> AuthState {
    AuthState::from_config(&test_config(), provider, registry)
}

pub fn in_memory_state(provider: Arc<TestProvider>) -> (AuthState, Arc<InMemoryRevocationRegistry>) {
    let registry = Arc::new(InMemoryRevocationRegistry::new());
    (auth_state(provider, registry.clone()), registry)
}

async fn profile(Authenticated(identity): Authenticated) -> Json<Value> {
    Json(json!({
        "subject": identity.subject(),
        "expires_at": identity.expires_at().unix_timestamp(),
    }))
}

pub fn app(state: AuthState) -> Router {
    Router::new()
        .route("/v1/user/profile", get(profile))
        .route("/v1/user/logout", post(logout_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .with_state(state)
}

pub fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub fn post_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
