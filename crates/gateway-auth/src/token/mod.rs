//! Access token verification.

mod claims;
mod verifier;

pub use claims::{ACCESS_TOKEN_TYPE, Claims, TokenType};
pub use verifier::{ACCEPTED_ALGORITHM, TokenVerifier};
