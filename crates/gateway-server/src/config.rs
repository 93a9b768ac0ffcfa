//! Gateway configuration.
//!
//! Loaded from a TOML file with `GATEWAY__`-prefixed environment overrides,
//! e.g. `GATEWAY__AUTH__KEY_SET__URL=https://auth/.well-known/jwks.json`.

use std::path::Path;

use config::{Config, Environment, File};
use gateway_auth::AuthConfig;
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "GATEWAY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Redis revocation registry.
///
/// When disabled, revocations are kept in process memory and are not shared
/// between gateway instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection checkout timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix of revocation keys; must match the authorization service.
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    2_000
}

fn default_redis_key_prefix() -> String {
    gateway_auth_redis::DEFAULT_KEY_PREFIX.to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("config build error: {0}")]
    Build(#[from] config::ConfigError),

    #[error(transparent)]
    Invalid(#[from] gateway_auth::ConfigError),
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), gateway_auth::ConfigError> {
        use gateway_auth::ConfigError;

        self.auth.validate()?;

        if self.auth.key_set.url.is_none() {
            return Err(ConfigError::Missing("auth.key_set.url".to_string()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue(
                "server.port must be > 0".to_string(),
            ));
        }
        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err(ConfigError::Missing("redis.url".to_string()));
            }
            if self.redis.pool_size == 0 {
                return Err(ConfigError::InvalidValue(
                    "redis.pool_size must be > 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Loads `path` (skipped if it does not exist) and applies environment
/// overrides, then validates the result.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigLoadError> {
    load_config_with_env(path, None)
}

/// Like [`load_config`], reading overrides from `env` instead of the process
/// environment when given.
pub fn load_config_with_env(
    path: &Path,
    env: Option<config::Map<String, String>>,
) -> Result<GatewayConfig, ConfigLoadError> {
    let mut builder = Config::builder();
    if path.exists() {
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__")
            .source(env),
    );

    let merged: GatewayConfig = builder.build()?.try_deserialize()?;
    merged.validate()?;
    Ok(merged)
}
