//! Domain entities

pub mod config;
pub mod identity;
pub mod token;

pub use config::{AuthMethod, ConnectionConfig, PoolSettings};
pub use identity::TargetIdentity;
pub use token::{
    AuthenticationToken, TokenKind, DEFAULT_SESSION_VALIDITY, TOKEN_EXPIRY_GRACE,
};
