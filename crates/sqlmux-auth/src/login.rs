//! Login endpoint client
//!
//! Shared by all four login protocols: builds the `login-request` envelope,
//! submits it, and turns the server's session data into an
//! [`AuthenticationToken`]. Also owns master-token session renewal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlmux_core::{
    AuthError, AuthenticationToken, Clock, LoginRequest, SystemClock, TokenKind,
    DEFAULT_SESSION_VALIDITY,
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub(crate) const LOGIN_PATH: &str = "/session/v1/login-request";
pub(crate) const AUTHENTICATOR_PATH: &str = "/session/authenticator-request";
pub(crate) const TOKEN_REQUEST_PATH: &str = "/session/token-request";

/// Server codes that mean "this credential was rejected"
const CREDENTIAL_REJECTED_CODES: &[&str] = &[
    "390100", // incorrect username or password
    "390144", // JWT token invalid
    "390303", // invalid OAuth access token
    "390318", // OAuth access token expired
];

/// Authenticator names sent in the login envelope
pub(crate) mod authenticator {
    pub const PASSWORD: &str = "SNOWFLAKE";
    pub const KEY_PAIR: &str = "SNOWFLAKE_JWT";
    pub const OAUTH: &str = "OAUTH";
    pub const EXTERNAL_BROWSER: &str = "EXTERNALBROWSER";
}

/// Protocol-specific fields of one login submission
#[derive(Debug, Default)]
pub(crate) struct LoginFields<'a> {
    pub authenticator: &'a str,
    pub password: Option<&'a str>,
    pub token: Option<&'a str>,
    pub proof_key: Option<&'a str>,
    /// Which credential to blame if the server rejects the login
    pub credential_field: &'static str,
}

#[derive(Serialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginData<'a> {
    account_name: &'a str,
    login_name: &'a str,
    client_app_id: &'a str,
    client_app_version: &'a str,
    authenticator: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proof_key: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct AuthenticatorData<'a> {
    account_name: &'a str,
    login_name: &'a str,
    client_app_id: &'a str,
    authenticator: &'a str,
    browser_mode_redirect_port: String,
    #[serde(flatten)]
    properties: &'a HashMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenewRequest<'a> {
    old_session_token: &'a str,
    request_type: &'a str,
}

/// Generic `{success, code, message, data}` response wrapper
#[derive(Debug, Deserialize)]
struct ServerResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    token: Option<String>,
    master_token: Option<String>,
    validity_in_seconds: Option<i64>,
    master_validity_in_seconds: Option<i64>,
    session_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RenewData {
    #[serde(rename = "sessionToken")]
    session_token: Option<String>,
    #[serde(rename = "validityInSecondsST")]
    validity_st: Option<i64>,
    #[serde(rename = "masterToken")]
    master_token: Option<String>,
    #[serde(rename = "validityInSecondsMT")]
    validity_mt: Option<i64>,
    #[serde(rename = "sessionId")]
    session_id: Option<serde_json::Value>,
}

/// SSO redirect returned by the authenticator request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SsoRedirect {
    pub sso_url: String,
    pub proof_key: String,
}

/// Render a JSON scalar (the server mixes numbers and strings) as text
fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// HTTP client for the warehouse session endpoints
#[derive(Clone)]
pub struct LoginClient {
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl Default for LoginClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Build `{base}{path}` with the session context as query parameters
    fn session_url(&self, request: &LoginRequest, path: &str) -> Result<Url, AuthError> {
        let base = request.config.base_url(request.account());
        let mut url = Url::parse(&format!("{}{}", base, path))
            .map_err(|e| AuthError::ProtocolFailure(format!("invalid server URL {}: {}", base, e)))?;

        {
            let identity = &request.identity;
            let mut query = url.query_pairs_mut();
            if let Some(db) = &identity.database {
                query.append_pair("databaseName", db);
            }
            if let Some(schema) = &identity.schema {
                query.append_pair("schemaName", schema);
            }
            if let Some(wh) = &identity.warehouse {
                query.append_pair("warehouse", wh);
            }
            if let Some(role) = &identity.role {
                query.append_pair("roleName", role);
            }
            query.append_pair("requestId", &Uuid::new_v4().to_string());
        }

        Ok(url)
    }

    /// Submit a login request and build the resulting token
    pub(crate) async fn login(
        &self,
        request: &LoginRequest,
        fields: LoginFields<'_>,
        kind: TokenKind,
    ) -> Result<AuthenticationToken, AuthError> {
        let url = self.session_url(request, LOGIN_PATH)?;
        let body = Envelope {
            data: LoginData {
                account_name: request.account(),
                login_name: request.user(),
                client_app_id: &request.config.application,
                client_app_version: env!("CARGO_PKG_VERSION"),
                authenticator: fields.authenticator,
                password: fields.password,
                token: fields.token,
                proof_key: fields.proof_key,
            },
        };

        debug!(
            identity = %request.identity,
            authenticator = fields.authenticator,
            "[Login] Submitting login request"
        );

        let send = self.http.post(url).json(&body).send();
        let data: SessionData = self
            .exchange(send, request.config.login_timeout, fields.credential_field)
            .await?;

        let token = self.token_from_session(data, kind)?;
        info!(
            identity = %request.identity,
            kind = %kind,
            expires_at = %token.expires_at,
            "[Login] Session established"
        );
        Ok(token)
    }

    /// Ask the server for the SSO URL of an external-browser login
    pub(crate) async fn request_sso_redirect(
        &self,
        request: &LoginRequest,
        redirect_port: u16,
        properties: &HashMap<String, String>,
    ) -> Result<SsoRedirect, AuthError> {
        let url = self.session_url(request, AUTHENTICATOR_PATH)?;
        let body = Envelope {
            data: AuthenticatorData {
                account_name: request.account(),
                login_name: request.user(),
                client_app_id: &request.config.application,
                authenticator: authenticator::EXTERNAL_BROWSER,
                browser_mode_redirect_port: redirect_port.to_string(),
                properties,
            },
        };

        let send = self.http.post(url).json(&body).send();
        self.exchange(send, request.config.login_timeout, "user")
            .await
    }

    /// Renew the session token with the master token
    pub(crate) async fn renew(
        &self,
        request: &LoginRequest,
        token: &AuthenticationToken,
    ) -> Result<AuthenticationToken, AuthError> {
        let master = token.master_token.as_deref().ok_or(AuthError::NotRefreshable)?;
        if !token.is_renewable_at(self.clock.now()) {
            return Err(AuthError::invalid_credentials(
                "master_token",
                "master token has expired",
            ));
        }

        let url = self.session_url(request, TOKEN_REQUEST_PATH)?;
        let body = RenewRequest {
            old_session_token: &token.session_token,
            request_type: "RENEW",
        };
        let send = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, format!("Snowflake Token=\"{}\"", master))
            .json(&body)
            .send();

        let data: RenewData = self
            .exchange(send, request.config.login_timeout, "master_token")
            .await?;

        let session_token = data.session_token.ok_or_else(|| {
            AuthError::MalformedResponse("renewal response has no sessionToken".to_string())
        })?;

        let now = self.clock.now();
        let validity = data
            .validity_st
            .map(ChronoDuration::seconds)
            .unwrap_or(DEFAULT_SESSION_VALIDITY);

        let mut renewed = AuthenticationToken::new(token.kind, session_token, now, validity)
            .with_refresh_token(token.refresh_token.clone())
            .with_session_id(
                data.session_id
                    .as_ref()
                    .map(json_to_string)
                    .or_else(|| token.session_id.clone()),
            );
        renewed.id_token = token.id_token.clone();

        match data.master_token {
            Some(master) => {
                let master_validity = data
                    .validity_mt
                    .map(ChronoDuration::seconds)
                    .unwrap_or(DEFAULT_SESSION_VALIDITY);
                renewed = renewed.with_master_token(master, now + master_validity);
            }
            None => {
                renewed.master_token = token.master_token.clone();
                renewed.master_expires_at = token.master_expires_at;
            }
        }

        info!(
            kind = %renewed.kind,
            expires_at = %renewed.expires_at,
            "[Login] Session renewed"
        );
        Ok(renewed)
    }

    /// Await a request under `timeout` and decode the `data` payload
    async fn exchange<T, F>(
        &self,
        send: F,
        timeout: Duration,
        credential_field: &'static str,
    ) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        F: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    {
        // One deadline for headers and body alike
        let (status, body) = match tokio::time::timeout(timeout, read_body(send)).await {
            Err(_) => return Err(AuthError::Timeout(timeout)),
            Ok(Err(e)) => return Err(map_transport_error(e, timeout)),
            Ok(Ok(read)) => read,
        };

        let parsed: ServerResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(AuthError::MalformedResponse(format!(
                    "invalid JSON body: {}",
                    e
                )));
            }
            Err(_) => {
                return Err(AuthError::ProtocolFailure(format!(
                    "HTTP {} - {}",
                    status, body
                )));
            }
        };

        if !parsed.success {
            let code = parsed.code.as_ref().map(json_to_string).unwrap_or_default();
            let message = parsed
                .message
                .unwrap_or_else(|| format!("HTTP {}", status));
            warn!(
                code = %code,
                credential_field,
                "[Login] Server rejected request: {}",
                message
            );
            if CREDENTIAL_REJECTED_CODES.contains(&code.as_str()) {
                return Err(AuthError::invalid_credentials(credential_field, message));
            }
            return Err(AuthError::ProtocolFailure(if code.is_empty() {
                message
            } else {
                format!("{} (code {})", message, code)
            }));
        }

        if !status.is_success() {
            return Err(AuthError::ProtocolFailure(format!("HTTP {} - {}", status, body)));
        }

        parsed
            .data
            .ok_or_else(|| AuthError::MalformedResponse("response has no data".to_string()))
    }

    fn token_from_session(
        &self,
        data: SessionData,
        kind: TokenKind,
    ) -> Result<AuthenticationToken, AuthError> {
        let session_token = data
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("login response has no token".to_string()))?;

        let now = self.clock.now();
        let validity = data
            .validity_in_seconds
            .map(ChronoDuration::seconds)
            .unwrap_or(DEFAULT_SESSION_VALIDITY);

        let mut token = AuthenticationToken::new(kind, session_token, now, validity)
            .with_session_id(data.session_id.as_ref().map(json_to_string));

        if let Some(master) = data.master_token {
            let master_validity = data
                .master_validity_in_seconds
                .map(ChronoDuration::seconds)
                .unwrap_or(DEFAULT_SESSION_VALIDITY);
            token = token.with_master_token(master, now + master_validity);
        }

        Ok(token)
    }
}

/// Send the request and read the whole response body
pub(crate) async fn read_body<F>(send: F) -> reqwest::Result<(reqwest::StatusCode, String)>
where
    F: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
{
    let response = send.await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

pub(crate) fn map_transport_error(e: reqwest::Error, timeout: Duration) -> AuthError {
    if e.is_timeout() {
        AuthError::Timeout(timeout)
    } else if e.is_connect() {
        AuthError::Unreachable(e.to_string())
    } else {
        AuthError::ProtocolFailure(e.to_string())
    }
}
