//! External-browser SSO login
//!
//! 1. Bind the loopback callback listener
//! 2. Ask the warehouse for the IdP URL and proof key for that port
//! 3. Open the URL in the user's browser
//! 4. Wait for the IdP to redirect back with the SAML assertion
//! 5. Log in with the assertion and proof key

mod browser;
mod callback;

pub use browser::{BrowserLauncher, PrintUrl, RecordingBrowser, SystemBrowser};
pub use callback::CallbackListener;

use std::collections::HashMap;
use std::time::Duration;

use sqlmux_core::{AuthError, AuthenticationToken, LoginRequest, TokenKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::login::{authenticator, LoginClient, LoginFields};

/// Settings of one SSO attempt
pub(crate) struct SsoOptions<'a> {
    pub callback_port: u16,
    pub timeout: Duration,
    pub properties: &'a HashMap<String, String>,
    pub cancel: Option<CancellationToken>,
}

pub(crate) async fn login(
    client: &LoginClient,
    browser: &dyn BrowserLauncher,
    request: &LoginRequest,
    options: SsoOptions<'_>,
) -> Result<AuthenticationToken, AuthError> {
    let listener = CallbackListener::bind(options.callback_port).await?;

    let redirect = client
        .request_sso_redirect(request, listener.port(), options.properties)
        .await?;

    info!(
        identity = %request.identity,
        port = listener.port(),
        "[SSO] Opening browser for external login"
    );
    if let Err(e) = browser.open(&redirect.sso_url) {
        // The user can still open the URL by hand
        warn!("[SSO] {}; open manually: {}", e, redirect.sso_url);
    }

    let assertion = listener.wait(options.timeout, options.cancel).await?;

    client
        .login(
            request,
            LoginFields {
                authenticator: authenticator::EXTERNAL_BROWSER,
                token: Some(&assertion),
                proof_key: Some(&redirect.proof_key),
                credential_field: "assertion",
                ..Default::default()
            },
            TokenKind::ExternalBrowser,
        )
        .await
}
