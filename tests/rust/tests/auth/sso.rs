//! External-browser SSO flow through the loopback callback listener

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use sqlmux_auth::{RecordingBrowser, WarehouseAuthenticator};
use sqlmux_core::{AuthenticationProvider, LoginRequest};
use tests::warehouse::{login_success, SsoRedirect, AUTHENTICATOR_PATH};
use tests::{AuthError, AuthMethod, RedirectingBrowser, TargetIdentity, TokenKind, WarehouseMock};
use tokio_util::sync::CancellationToken;

fn browser_method(timeout: Duration) -> AuthMethod {
    AuthMethod::ExternalBrowser {
        callback_port: 0,
        sso_timeout: timeout,
        properties: HashMap::from([("LOGIN_HINT".to_string(), "etl@acme.com".to_string())]),
    }
}

#[tokio::test]
async fn test_sso_login_completes_via_redirect() {
    let warehouse = WarehouseMock::start().await;
    warehouse
        .mount_sso(SsoRedirect::assertion("saml-assertion", "proof-1"))
        .await;
    warehouse.mount_login(login_success("sso-session", 3600)).await;

    let browser = RedirectingBrowser::default();
    let auth = WarehouseAuthenticator::new().with_browser(Arc::new(browser.clone()));
    let request = LoginRequest::new(
        TargetIdentity::new("acme", "etl"),
        warehouse.config(browser_method(Duration::from_secs(10))),
    );

    let token = auth.authenticate(&request).await.unwrap();
    assert_eq!(token.kind, TokenKind::ExternalBrowser);
    assert_eq!(token.session_token, "sso-session");
    assert_eq!(browser.opened().len(), 1);

    let authenticator_requests: Vec<serde_json::Value> = warehouse
        .server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == AUTHENTICATOR_PATH)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    let data = &authenticator_requests[0]["data"];
    assert_eq!(data["AUTHENTICATOR"], "EXTERNALBROWSER");
    assert_eq!(data["LOGIN_HINT"], "etl@acme.com");
    assert!(data["BROWSER_MODE_REDIRECT_PORT"].as_str().unwrap().parse::<u16>().is_ok());

    let bodies = warehouse.login_bodies().await;
    assert_eq!(bodies[0]["data"]["AUTHENTICATOR"], "EXTERNALBROWSER");
    assert_eq!(bodies[0]["data"]["TOKEN"], "saml-assertion");
    assert_eq!(bodies[0]["data"]["PROOF_KEY"], "proof-1");
}

#[tokio::test]
async fn test_sso_times_out_without_redirect() {
    let warehouse = WarehouseMock::start().await;
    warehouse
        .mount_sso(SsoRedirect::assertion("never-delivered", "proof-1"))
        .await;
    warehouse.mount_login(login_success("unused", 3600)).await;

    // Opens nothing, so the callback never arrives
    let browser = RecordingBrowser::default();
    let auth = WarehouseAuthenticator::new().with_browser(Arc::new(browser.clone()));
    let request = LoginRequest::new(
        TargetIdentity::new("acme", "etl"),
        warehouse.config(browser_method(Duration::from_millis(200))),
    );

    let err = auth.authenticate(&request).await.unwrap_err();
    assert!(matches!(err, AuthError::CallbackTimeout(_)));
    assert_eq!(browser.opened().len(), 1);
    assert!(warehouse.login_bodies().await.is_empty());
}

#[tokio::test]
async fn test_sso_cancelled() {
    let warehouse = WarehouseMock::start().await;
    warehouse
        .mount_sso(SsoRedirect::assertion("never-delivered", "proof-1"))
        .await;

    let cancel = CancellationToken::new();
    let auth = WarehouseAuthenticator::new()
        .with_browser(Arc::new(RecordingBrowser::default()))
        .with_cancellation(cancel.clone());
    let request = LoginRequest::new(
        TargetIdentity::new("acme", "etl"),
        warehouse.config(browser_method(Duration::from_secs(30))),
    );

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let err = auth.authenticate(&request).await.unwrap_err();
    assert!(matches!(err, AuthError::Cancelled));
}

#[tokio::test]
async fn test_idp_error_is_assertion_failure() {
    let warehouse = WarehouseMock::start().await;
    warehouse
        .mount_sso(SsoRedirect::idp_error("access_denied", "proof-1"))
        .await;

    let auth = WarehouseAuthenticator::new().with_browser(Arc::new(RedirectingBrowser::default()));
    let request = LoginRequest::new(
        TargetIdentity::new("acme", "etl"),
        warehouse.config(browser_method(Duration::from_secs(10))),
    );

    let err = auth.authenticate(&request).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::InvalidCredentials { field: "assertion", .. }
    ));
}

#[tokio::test]
async fn test_listener_port_in_use() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let warehouse = WarehouseMock::start().await;
    let auth = WarehouseAuthenticator::new().with_browser(Arc::new(RecordingBrowser::default()));
    let request = LoginRequest::new(
        TargetIdentity::new("acme", "etl"),
        warehouse.config(AuthMethod::ExternalBrowser {
            callback_port: port,
            sso_timeout: Duration::from_secs(1),
            properties: HashMap::new(),
        }),
    );

    let err = auth.authenticate(&request).await.unwrap_err();
    assert!(matches!(err, AuthError::CallbackBind(_)));
}
