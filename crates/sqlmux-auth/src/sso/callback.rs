//! Loopback listener for the SSO redirect
//!
//! The identity provider redirects the browser to
//! `http://localhost:<port>/?token=<assertion>`. Some providers POST the
//! assertion as a form instead, so both are accepted on `/`. An `error`
//! parameter means the IdP refused the login.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use sqlmux_core::AuthError;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Assertion, or the IdP's error description
type Callback = Result<String, String>;
type AssertionSender = Arc<Mutex<Option<oneshot::Sender<Callback>>>>;

const COMPLETE_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>SqlMux - Login Complete</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
               display: flex; align-items: center; justify-content: center;
               min-height: 100vh; margin: 0; background: #f5f5f5; color: #222; }
        .container { text-align: center; max-width: 400px; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Login Complete</h1>
        <p>You can close this window and return to your application.</p>
    </div>
    <script>setTimeout(function(){ window.close(); }, 2000);</script>
</body>
</html>"##;

const FAILED_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>SqlMux - Login Failed</title></head>
<body><h1>Login Failed</h1><p>The identity provider rejected the login. You can close this window.</p></body>
</html>"##;

const MISSING_TOKEN_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>SqlMux - Login Failed</title></head>
<body><h1>Login Failed</h1><p>The identity provider did not return a token.</p></body>
</html>"##;

/// Single-use loopback HTTP server that captures one SSO assertion
pub struct CallbackListener {
    port: u16,
    assertion_rx: Option<oneshot::Receiver<Callback>>,
    shutdown_tx: watch::Sender<bool>,
}

impl CallbackListener {
    /// Bind `127.0.0.1:<port>` (0 = OS-assigned) and start serving
    pub async fn bind(port: u16) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| AuthError::CallbackBind(format!("127.0.0.1:{}: {}", port, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::CallbackBind(e.to_string()))?
            .port();

        let (assertion_tx, assertion_rx) = oneshot::channel();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let sender: AssertionSender = Arc::new(Mutex::new(Some(assertion_tx)));

        let app = Router::new()
            .route("/", get(receive_redirect).post(receive_form))
            .with_state(sender);

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
                debug!("[SSO] Callback listener shutting down");
            });

            if let Err(e) = server.await {
                error!("[SSO] Callback listener error: {}", e);
            }
        });

        info!(port, "[SSO] Callback listener bound on 127.0.0.1");

        Ok(Self {
            port,
            assertion_rx: Some(assertion_rx),
            shutdown_tx,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the assertion, at most `timeout`, aborting early if
    /// `cancel` fires. Stops the listener either way.
    pub async fn wait(
        mut self,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<String, AuthError> {
        let rx = self
            .assertion_rx
            .take()
            .ok_or_else(|| AuthError::ProtocolFailure("callback already consumed".to_string()))?;
        let cancel = cancel.unwrap_or_default();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            received = tokio::time::timeout(timeout, rx) => match received {
                Err(_) => Err(AuthError::CallbackTimeout(timeout)),
                Ok(Err(_)) => Err(AuthError::ProtocolFailure(
                    "callback listener stopped before a token arrived".to_string(),
                )),
                Ok(Ok(Ok(assertion))) => Ok(assertion),
                Ok(Ok(Err(reason))) => Err(AuthError::invalid_credentials("assertion", reason)),
            },
        };

        let _ = self.shutdown_tx.send(true);
        result
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn deliver(sender: &AssertionSender, params: HashMap<String, String>) -> Html<&'static str> {
    let callback = match (params.get("token"), params.get("error")) {
        (Some(token), _) if !token.is_empty() => Ok(token.clone()),
        (_, Some(error)) => {
            let description = params
                .get("error_description")
                .map(|d| format!("{}: {}", error, d))
                .unwrap_or_else(|| error.clone());
            Err(description)
        }
        _ => {
            warn!("[SSO] Callback without token parameter");
            return Html(MISSING_TOKEN_PAGE);
        }
    };

    let page = if callback.is_ok() {
        COMPLETE_PAGE
    } else {
        FAILED_PAGE
    };

    match sender.lock().take() {
        Some(tx) => {
            match &callback {
                Ok(_) => info!("[SSO] Assertion received"),
                Err(reason) => warn!("[SSO] Identity provider returned an error: {}", reason),
            }
            let _ = tx.send(callback);
        }
        None => warn!("[SSO] Duplicate callback ignored"),
    }
    Html(page)
}

async fn receive_redirect(
    State(sender): State<AssertionSender>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    deliver(&sender, params)
}

async fn receive_form(
    State(sender): State<AssertionSender>,
    Form(params): Form<HashMap<String, String>>,
) -> Html<&'static str> {
    deliver(&sender, params)
}
