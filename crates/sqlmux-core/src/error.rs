//! Error taxonomy
//!
//! Callers see a usable session, a capacity/timeout error, or an
//! authentication error with method-specific detail. Reuse-time session
//! invalidity is handled inside the pool and has no variant here.

use std::time::Duration;

use thiserror::Error;

/// Login, refresh or renewal failure
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server (or local key handling) rejected a credential
    #[error("invalid credentials ({field}): {message}")]
    InvalidCredentials {
        /// Which credential was rejected, e.g. `password` or `private_key`
        field: &'static str,
        message: String,
    },

    #[error("token cannot be refreshed: no refresh credential")]
    NotRefreshable,

    #[error("login protocol failure: {0}")]
    ProtocolFailure(String),

    #[error("authentication endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("malformed authentication response: {0}")]
    MalformedResponse(String),

    #[error("authentication request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to bind SSO callback listener: {0}")]
    CallbackBind(String),

    #[error("no SSO assertion received within {0:?}")]
    CallbackTimeout(Duration),

    #[error("authentication cancelled")]
    Cancelled,
}

impl AuthError {
    pub fn invalid_credentials(field: &'static str, message: impl Into<String>) -> Self {
        AuthError::InvalidCredentials {
            field,
            message: message.into(),
        }
    }

    /// Whether the failure is about the credential itself rather than
    /// transport or protocol plumbing
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials { .. } | AuthError::NotRefreshable
        )
    }
}

/// Invalid configuration values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors surfaced by pool acquisition
#[derive(Debug, Error)]
pub enum PoolError {
    /// No idle session and no capacity became available in time
    #[error("pool capacity exhausted after waiting {waited:?}")]
    CapacityExhausted { waited: Duration },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("pool is shutting down")]
    TeardownInProgress,

    #[error("acquire cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PoolError {
    /// Whether retrying later may succeed without changing anything
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::CapacityExhausted { .. })
    }
}
