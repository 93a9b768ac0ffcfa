//! API gateway server.
//!
//! Wires [`gateway_auth`] into an axum router: the key set is fetched from
//! the configured JWKS endpoint and revocations go to Redis when enabled.

pub mod config;
pub mod observability;
pub mod server;

pub use config::{GatewayConfig, load_config};
pub use server::{Server, build_revocation_registry, build_router};
