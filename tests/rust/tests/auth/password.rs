//! Password login and response error mapping

use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use sqlmux_auth::WarehouseAuthenticator;
use sqlmux_core::{AuthenticationProvider, LoginRequest, DEFAULT_SESSION_VALIDITY};
use tests::warehouse::{login_failure, login_success, StalledServer, LOGIN_PATH};
use tests::{init_test_logging, AuthError, AuthMethod, TargetIdentity, TokenKind, WarehouseMock};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn identity() -> TargetIdentity {
    TargetIdentity::new("acme", "etl_user")
        .with_database("SALES")
        .with_warehouse("COMPUTE_WH")
}

#[tokio::test]
async fn test_password_login_success() {
    init_test_logging();
    let warehouse = WarehouseMock::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(query_param("databaseName", "SALES"))
        .and(query_param("warehouse", "COMPUTE_WH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_success("tok-1", 3600)))
        .expect(1)
        .mount(&warehouse.server)
        .await;

    let request = LoginRequest::new(identity(), warehouse.config(AuthMethod::password("hunter2")));
    let before = Utc::now();
    let token = WarehouseAuthenticator::new()
        .authenticate(&request)
        .await
        .unwrap();

    assert_eq!(token.session_token, "tok-1");
    assert_eq!(token.kind, TokenKind::Password);
    assert_eq!(token.master_token.as_deref(), Some("master-tok-1"));
    assert_eq!(token.session_id.as_deref(), Some("4242"));
    assert!(!token.is_refreshable());
    assert!(token.expires_at >= before + chrono::Duration::seconds(3600));

    let bodies = warehouse.login_bodies().await;
    let data = &bodies[0]["data"];
    assert_eq!(data["AUTHENTICATOR"], "SNOWFLAKE");
    assert_eq!(data["ACCOUNT_NAME"], "acme");
    assert_eq!(data["LOGIN_NAME"], "etl_user");
    assert_eq!(data["PASSWORD"], "hunter2");
    assert_eq!(data["CLIENT_APP_ID"], "sqlmux");
}

#[tokio::test]
async fn test_missing_validity_defaults_to_four_hours() {
    let warehouse = WarehouseMock::start().await;
    warehouse
        .mount_login(json!({ "success": true, "data": { "token": "tok" } }))
        .await;

    let request = LoginRequest::new(identity(), warehouse.config(AuthMethod::password("pw")));
    let token = WarehouseAuthenticator::new()
        .authenticate(&request)
        .await
        .unwrap();

    assert_eq!(token.expires_at - token.issued_at, DEFAULT_SESSION_VALIDITY);
    assert!(token.master_token.is_none());
}

#[tokio::test]
async fn test_wrong_password_names_field() {
    let warehouse = WarehouseMock::start().await;
    warehouse
        .mount_login(login_failure("390100", "Incorrect username or password was specified."))
        .await;

    let request = LoginRequest::new(identity(), warehouse.config(AuthMethod::password("nope")));
    let err = WarehouseAuthenticator::new()
        .authenticate(&request)
        .await
        .unwrap_err();

    match err {
        AuthError::InvalidCredentials { field, message } => {
            assert_eq!(field, "password");
            assert!(message.contains("Incorrect username"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_other_rejection_is_protocol_failure() {
    let warehouse = WarehouseMock::start().await;
    warehouse
        .mount_login(login_failure("390422", "IP address is not allowed"))
        .await;

    let request = LoginRequest::new(identity(), warehouse.config(AuthMethod::password("pw")));
    let err = WarehouseAuthenticator::new()
        .authenticate(&request)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::ProtocolFailure(ref m) if m.contains("390422")));
}

#[tokio::test]
async fn test_server_error_is_protocol_failure() {
    let warehouse = WarehouseMock::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&warehouse.server)
        .await;

    let request = LoginRequest::new(identity(), warehouse.config(AuthMethod::password("pw")));
    let err = WarehouseAuthenticator::new()
        .authenticate(&request)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::ProtocolFailure(ref m) if m.contains("503")));
}

#[tokio::test]
async fn test_garbage_body_is_malformed() {
    let warehouse = WarehouseMock::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&warehouse.server)
        .await;

    let request = LoginRequest::new(identity(), warehouse.config(AuthMethod::password("pw")));
    let err = WarehouseAuthenticator::new()
        .authenticate(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_missing_token_is_malformed() {
    let warehouse = WarehouseMock::start().await;
    warehouse
        .mount_login(json!({ "success": true, "data": { "validityInSeconds": 60 } }))
        .await;

    let request = LoginRequest::new(identity(), warehouse.config(AuthMethod::password("pw")));
    let err = WarehouseAuthenticator::new()
        .authenticate(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_slow_login_times_out() {
    let warehouse = WarehouseMock::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(login_success("late", 3600))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&warehouse.server)
        .await;

    let config = warehouse
        .config(AuthMethod::password("pw"))
        .with_login_timeout(Duration::from_millis(100));
    let request = LoginRequest::new(identity(), config);

    let err = WarehouseAuthenticator::new()
        .authenticate(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Timeout(d) if d == Duration::from_millis(100)));
}

#[tokio::test]
async fn test_login_timeout_covers_stalled_body() {
    let server = StalledServer::start().await;
    let config = sqlmux_core::ConnectionConfig::new(AuthMethod::password("pw"))
        .with_server_url(server.url())
        .with_login_timeout(Duration::from_millis(200));
    let request = LoginRequest::new(identity(), config);

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        WarehouseAuthenticator::new().authenticate(&request),
    )
    .await
    .expect("login outlived its own timeout");

    assert!(matches!(result, Err(AuthError::Timeout(d)) if d == Duration::from_millis(200)));
}

#[tokio::test]
async fn test_unreachable_server() {
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = sqlmux_core::ConnectionConfig::new(AuthMethod::password("pw"))
        .with_server_url(format!("http://127.0.0.1:{}", port));
    let request = LoginRequest::new(identity(), config);

    let err = WarehouseAuthenticator::new()
        .authenticate(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unreachable(_)), "got {:?}", err);
}
