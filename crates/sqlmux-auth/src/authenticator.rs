//! HTTP-backed [`AuthenticationProvider`]

use std::sync::Arc;

use async_trait::async_trait;
use sqlmux_core::{
    AuthError, AuthMethod, AuthenticationProvider, AuthenticationToken, Clock, LoginRequest,
    SystemClock,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::login::LoginClient;
use crate::oauth::RefreshEndpoint;
use crate::sso::{BrowserLauncher, SsoOptions, SystemBrowser};
use crate::{keypair, oauth, password, sso};

/// Logs in against the warehouse session endpoints with whichever method
/// the connection config names
pub struct WarehouseAuthenticator {
    client: LoginClient,
    browser: Arc<dyn BrowserLauncher>,
    clock: Arc<dyn Clock>,
    cancel: Option<CancellationToken>,
}

impl Default for WarehouseAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl WarehouseAuthenticator {
    pub fn new() -> Self {
        Self {
            client: LoginClient::new(),
            browser: Arc::new(SystemBrowser),
            clock: Arc::new(SystemClock),
            cancel: None,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.client = self.client.with_http_client(http);
        self
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.client = self.client.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Abort pending SSO waits when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[async_trait]
impl AuthenticationProvider for WarehouseAuthenticator {
    async fn authenticate(&self, request: &LoginRequest) -> Result<AuthenticationToken, AuthError> {
        debug!(
            identity = %request.identity,
            method = %request.method().token_kind(),
            "[Auth] Authenticating"
        );

        match request.method() {
            AuthMethod::Password { password: secret } => {
                password::login(&self.client, request, secret).await
            }
            AuthMethod::KeyPair {
                private_key_path,
                private_key_passphrase,
            } => {
                keypair::login(
                    &self.client,
                    request,
                    private_key_path,
                    private_key_passphrase.as_ref().map(|p| p.as_str()),
                    self.clock.now(),
                )
                .await
            }
            AuthMethod::OAuth {
                access_token,
                refresh_token,
                ..
            } => {
                oauth::login(
                    &self.client,
                    request,
                    access_token,
                    refresh_token.as_ref().map(|t| t.as_str()),
                )
                .await
            }
            AuthMethod::ExternalBrowser {
                callback_port,
                sso_timeout,
                properties,
            } => {
                sso::login(
                    &self.client,
                    self.browser.as_ref(),
                    request,
                    SsoOptions {
                        callback_port: *callback_port,
                        timeout: *sso_timeout,
                        properties,
                        cancel: self.cancel.clone(),
                    },
                )
                .await
            }
        }
    }

    async fn refresh(
        &self,
        request: &LoginRequest,
        token: &AuthenticationToken,
    ) -> Result<AuthenticationToken, AuthError> {
        match request.method() {
            AuthMethod::OAuth {
                token_endpoint,
                client_id,
                client_secret,
                ..
            } => {
                let endpoint = RefreshEndpoint {
                    token_endpoint: token_endpoint.as_deref(),
                    client_id: client_id.as_deref(),
                    client_secret: client_secret.as_ref().map(|s| s.as_str()),
                };
                oauth::refresh(&self.client, request, endpoint, token).await
            }
            _ => Err(AuthError::NotRefreshable),
        }
    }

    async fn renew(
        &self,
        request: &LoginRequest,
        token: &AuthenticationToken,
    ) -> Result<AuthenticationToken, AuthError> {
        self.client.renew(request, token).await
    }

    fn invalidate(&self, token: &AuthenticationToken) {
        // Sessions time out server-side; nothing to revoke locally
        info!(
            kind = %token.kind,
            session_id = token.session_id.as_deref().unwrap_or("-"),
            "[Auth] Token discarded"
        );
    }
}
