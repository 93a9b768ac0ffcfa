//! Redis-backed [`RevocationRegistry`].
//!
//! Revoked tokens are stored as `<prefix><sha256-hex>` keys with value `"1"`
//! and a Redis-side expiry, so entries disappear on their own once the token
//! could no longer be used anyway. Every gateway instance pointing at the
//! same Redis shares the registry.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime, Timeouts};
use gateway_auth::{RevocationError, RevocationKey, RevocationRegistry};
use redis::AsyncCommands;

/// Key prefix shared with the authorization service.
pub const DEFAULT_KEY_PREFIX: &str = "gateway:token:blacklist:";

const REVOKED_MARKER: &str = "1";

/// Errors while setting up the Redis pool.
#[derive(Debug, thiserror::Error)]
pub enum RedisRegistryError {
    #[error("Failed to create Redis pool: {0}")]
    Pool(#[from] deadpool_redis::CreatePoolError),

    #[error("Failed to connect to Redis: {0}")]
    Connection(String),
}

/// Revocation registry stored in Redis.
#[derive(Clone)]
pub struct RedisRevocationRegistry {
    pool: Pool,
    prefix: String,
}

impl RedisRevocationRegistry {
    /// Wraps an existing pool, using [`DEFAULT_KEY_PREFIX`].
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Builds a pool for `url`.
    ///
    /// `timeout` bounds waiting for, creating and recycling a connection.
    /// No connection is opened until the first call; use
    /// [`RedisRevocationRegistry::ping`] to check reachability at startup.
    pub fn from_url(
        url: &str,
        pool_size: usize,
        timeout: Duration,
    ) -> Result<Self, RedisRegistryError> {
        let mut config = deadpool_redis::Config::from_url(url);
        let mut pool_config = PoolConfig::new(pool_size);
        pool_config.timeouts = Timeouts {
            wait: Some(timeout),
            create: Some(timeout),
            recycle: Some(timeout),
        };
        config.pool = Some(pool_config);

        let pool = config.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self::new(pool))
    }

    /// Replaces the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Checks out a connection and sends `PING`.
    pub async fn ping(&self) -> Result<(), RedisRegistryError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RedisRegistryError::Connection(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| RedisRegistryError::Connection(e.to_string()))
    }

    fn redis_key(&self, key: &RevocationKey) -> String {
        format!("{}{}", self.prefix, key.as_str())
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, RevocationError> {
        self.pool
            .get()
            .await
            .map_err(|e| RevocationError::backend(format!("pool: {e}")))
    }
}

impl std::fmt::Debug for RedisRevocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRevocationRegistry")
            .field("prefix", &self.prefix)
            .field("pool", &self.pool.status())
            .finish()
    }
}

/// Whole seconds for `SETEX`: rounded up, never zero.
fn expiry_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl RevocationRegistry for RedisRevocationRegistry {
    async fn exists(&self, key: &RevocationKey) -> Result<bool, RevocationError> {
        let mut conn = self.connection().await?;
        conn.exists::<_, bool>(self.redis_key(key))
            .await
            .map_err(|e| RevocationError::backend(e.to_string()))
    }

    async fn record(&self, key: &RevocationKey, ttl: Duration) -> Result<(), RevocationError> {
        let mut conn = self.connection().await?;
        let seconds = expiry_seconds(ttl);
        conn.set_ex::<_, _, ()>(self.redis_key(key), REVOKED_MARKER, seconds)
            .await
            .map_err(|e| RevocationError::backend(e.to_string()))?;

        tracing::debug!(ttl_secs = seconds, "Revocation stored in Redis");
        Ok(())
    }
}
