//! Axum HTTP handlers.

pub mod logout;

pub use logout::{LogoutError, LogoutResponse, logout_handler};
