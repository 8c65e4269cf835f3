//! Authentication provider seam
//!
//! The pool only ever talks to this trait. The HTTP implementation lives in
//! `sqlmux-auth`; tests plug in scripted providers.

use async_trait::async_trait;

use crate::domain::{AuthMethod, AuthenticationToken, ConnectionConfig, TargetIdentity};
use crate::error::AuthError;

/// Everything a login handshake needs
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub identity: TargetIdentity,
    pub config: ConnectionConfig,
}

impl LoginRequest {
    pub fn new(identity: TargetIdentity, config: ConnectionConfig) -> Self {
        Self { identity, config }
    }

    pub fn account(&self) -> &str {
        &self.identity.account
    }

    pub fn user(&self) -> &str {
        &self.identity.user
    }

    pub fn method(&self) -> &AuthMethod {
        &self.config.auth
    }
}

#[async_trait]
pub trait AuthenticationProvider: Send + Sync {
    /// Perform a login handshake with the configured method
    async fn authenticate(&self, request: &LoginRequest) -> Result<AuthenticationToken, AuthError>;

    /// Exchange the token's refresh credential for a new token.
    ///
    /// Fails with [`AuthError::NotRefreshable`] when the token carries none.
    async fn refresh(
        &self,
        request: &LoginRequest,
        token: &AuthenticationToken,
    ) -> Result<AuthenticationToken, AuthError>;

    /// Renew the session token using the master token.
    ///
    /// Providers without a renewal protocol report `NotRefreshable`.
    async fn renew(
        &self,
        request: &LoginRequest,
        token: &AuthenticationToken,
    ) -> Result<AuthenticationToken, AuthError> {
        let _ = (request, token);
        Err(AuthError::NotRefreshable)
    }

    /// Local bookkeeping when a token is discarded. Never touches the network.
    fn invalidate(&self, token: &AuthenticationToken);
}
