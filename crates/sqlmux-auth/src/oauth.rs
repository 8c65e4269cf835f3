//! OAuth access-token login and refresh-token grant

use std::collections::HashMap;

use oauth2::basic::BasicTokenResponse;
use oauth2::TokenResponse;
use sqlmux_core::{AuthError, AuthenticationToken, LoginRequest, TokenKind};
use tracing::{info, warn};

use crate::login::{authenticator, map_transport_error, read_body, LoginClient, LoginFields};

/// Where and as whom to run the refresh grant
#[derive(Debug, Clone, Copy)]
pub(crate) struct RefreshEndpoint<'a> {
    pub token_endpoint: Option<&'a str>,
    pub client_id: Option<&'a str>,
    pub client_secret: Option<&'a str>,
}

/// Log in with an OAuth access token. The refresh token, if any, rides
/// along on the resulting session token.
pub(crate) async fn login(
    client: &LoginClient,
    request: &LoginRequest,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<AuthenticationToken, AuthError> {
    if access_token.is_empty() {
        return Err(AuthError::invalid_credentials("token", "access token is empty"));
    }

    let token = client
        .login(
            request,
            LoginFields {
                authenticator: authenticator::OAUTH,
                token: Some(access_token),
                credential_field: "token",
                ..Default::default()
            },
            TokenKind::OAuth,
        )
        .await?;

    Ok(token.with_refresh_token(refresh_token.map(str::to_string)))
}

/// Exchange the token's refresh credential at the token endpoint, then log
/// in again with the new access token
pub(crate) async fn refresh(
    client: &LoginClient,
    request: &LoginRequest,
    endpoint: RefreshEndpoint<'_>,
    token: &AuthenticationToken,
) -> Result<AuthenticationToken, AuthError> {
    let refresh_token = token.refresh_token.as_deref().ok_or(AuthError::NotRefreshable)?;
    let token_endpoint = endpoint.token_endpoint.ok_or_else(|| {
        AuthError::ProtocolFailure("no token endpoint configured for refresh".to_string())
    })?;

    info!(identity = %request.identity, "[OAuth] Refreshing access token");

    let mut params = HashMap::new();
    params.insert("grant_type", "refresh_token");
    params.insert("refresh_token", refresh_token);
    if let Some(client_id) = endpoint.client_id {
        params.insert("client_id", client_id);
    }
    if let Some(secret) = endpoint.client_secret {
        params.insert("client_secret", secret);
    }

    let timeout = request.config.login_timeout;
    let send = client.http().post(token_endpoint).form(&params).send();
    let (status, body) = match tokio::time::timeout(timeout, read_body(send)).await {
        Err(_) => return Err(AuthError::Timeout(timeout)),
        Ok(Err(e)) => return Err(map_transport_error(e, timeout)),
        Ok(Ok(read)) => read,
    };

    if !status.is_success() {
        warn!(status = %status, "[OAuth] Token refresh rejected");
        if status.is_client_error() {
            return Err(AuthError::invalid_credentials(
                "refresh_token",
                format!("HTTP {} - {}", status, body),
            ));
        }
        return Err(AuthError::ProtocolFailure(format!(
            "token refresh failed: HTTP {} - {}",
            status, body
        )));
    }

    let grant: BasicTokenResponse = serde_json::from_str(&body)
        .map_err(|e| AuthError::MalformedResponse(format!("invalid token response: {}", e)))?;

    // Providers that do not rotate refresh tokens omit it from the response
    let next_refresh = grant
        .refresh_token()
        .map(|t| t.secret().clone())
        .or_else(|| token.refresh_token.clone());

    let refreshed = login(
        client,
        request,
        grant.access_token().secret(),
        next_refresh.as_deref(),
    )
    .await?;

    info!(
        identity = %request.identity,
        expires_at = %refreshed.expires_at,
        "[OAuth] Token refresh successful"
    );
    Ok(refreshed)
}
