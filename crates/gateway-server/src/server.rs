use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use gateway_auth::{
    AuthState, Authenticated, HttpKeySetProvider, InMemoryRevocationRegistry, RevocationRegistry,
    logout_handler, require_auth,
};
use gateway_auth_redis::RedisRevocationRegistry;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::config::{GatewayConfig, RedisConfig};

/// Builds the HTTP router. `/v1/user/*` requires a valid bearer token.
pub fn build_router(auth: AuthState) -> Router {
    let protected = Router::new()
        .route("/v1/user/profile", get(profile))
        .route("/v1/user/logout", post(logout_handler))
        .route_layer(middleware::from_fn_with_state(auth.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(auth)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn profile(Authenticated(identity): Authenticated) -> Json<Value> {
    Json(json!({
        "subject": identity.subject(),
        "expires_at": identity.expires_at().unix_timestamp(),
    }))
}

/// How often the in-memory registry drops expired revocations.
pub const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn memory_registry() -> Arc<InMemoryRevocationRegistry> {
    let registry = Arc::new(InMemoryRevocationRegistry::new());
    registry.start_purge_task(MEMORY_PURGE_INTERVAL);
    registry
}

/// Chooses the revocation registry.
///
/// An unreachable Redis is not fatal: the registry is still used, so
/// requests are rejected until it comes back.
pub async fn build_revocation_registry(
    config: &RedisConfig,
) -> anyhow::Result<Arc<dyn RevocationRegistry>> {
    if !config.enabled {
        tracing::warn!("Redis disabled, revocations are kept in memory and not shared");
        return Ok(memory_registry());
    }

    tracing::info!(url = %config.url, prefix = %config.key_prefix, "Connecting to Redis");
    let registry = RedisRevocationRegistry::from_url(
        &config.url,
        config.pool_size,
        Duration::from_millis(config.timeout_ms),
    )?
    .with_prefix(config.key_prefix.as_str());

    match registry.ping().await {
        Ok(()) => tracing::info!("Connected to Redis"),
        Err(e) => tracing::warn!(error = %e, "Redis unreachable at startup"),
    }

    Ok(Arc::new(registry))
}

pub struct Server {
    addr: String,
    app: Router,
}

impl Server {
    pub async fn build(cfg: &GatewayConfig) -> anyhow::Result<Self> {
        let provider = HttpKeySetProvider::from_config(&cfg.auth.key_set)?;
        tracing::info!(url = %provider.url(), issuer = %cfg.auth.issuer, "Key set provider configured");

        let registry = build_revocation_registry(&cfg.redis).await?;
        let auth = AuthState::from_config(&cfg.auth, Arc::new(provider), registry);

        // Requests still load the key set lazily if this fails.
        match auth.key_set().warm_up().await {
            Ok(keys) => tracing::info!(keys, "Key set loaded"),
            Err(e) => tracing::warn!(error = %e, "Initial key set load failed"),
        }

        Ok(Self {
            addr: cfg.server.bind_address(),
            app: build_router(auth),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
