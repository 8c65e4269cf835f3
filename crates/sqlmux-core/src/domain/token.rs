//! Authentication token types
//!
//! Every login protocol converges on [`AuthenticationToken`], so the pool
//! never needs to know which method produced a session. Tokens are
//! immutable once issued: refresh and renewal build a new token.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Buffer before expiry at which a token counts as "expiring soon".
pub const TOKEN_EXPIRY_GRACE: Duration = Duration::minutes(5);

/// Session validity assumed when the login response does not state one.
pub const DEFAULT_SESSION_VALIDITY: Duration = Duration::hours(4);

/// Which login protocol produced a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Password,
    KeyPair,
    OAuth,
    ExternalBrowser,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Password => "password",
            TokenKind::KeyPair => "key_pair",
            TokenKind::OAuth => "oauth",
            TokenKind::ExternalBrowser => "external_browser",
        };
        f.write_str(name)
    }
}

/// Credential bundle returned by a successful login.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthenticationToken {
    /// Session token sent with every query request
    pub session_token: String,

    /// Long-lived token used to renew the session token
    pub master_token: Option<String>,

    /// OAuth refresh token (only for OAuth logins)
    pub refresh_token: Option<String>,

    /// ID token (for OIDC-backed OAuth)
    pub id_token: Option<String>,

    pub kind: TokenKind,

    /// Server-side session identifier, if reported
    pub session_id: Option<String>,

    pub issued_at: DateTime<Utc>,

    /// Session token expiry
    pub expires_at: DateTime<Utc>,

    /// Master token expiry
    pub master_expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for AuthenticationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationToken")
            .field("kind", &self.kind)
            .field("session_id", &self.session_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("has_master_token", &self.master_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

impl AuthenticationToken {
    /// Create a token valid for `validity` from `issued_at`.
    pub fn new(
        kind: TokenKind,
        session_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        validity: Duration,
    ) -> Self {
        Self {
            session_token: session_token.into(),
            master_token: None,
            refresh_token: None,
            id_token: None,
            kind,
            session_id: None,
            issued_at,
            expires_at: issued_at + validity,
            master_expires_at: None,
        }
    }

    pub fn with_master_token(mut self, token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        self.master_token = Some(token.into());
        self.master_expires_at = Some(expires_at);
        self
    }

    pub fn with_refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = token;
        self
    }

    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Check if the token is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check if the token will expire within `grace` of `now`
    pub fn expires_soon_at(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now + grace >= self.expires_at
    }

    /// Check if the token will expire within [`TOKEN_EXPIRY_GRACE`]
    pub fn expires_soon(&self) -> bool {
        self.expires_soon_at(Utc::now(), TOKEN_EXPIRY_GRACE)
    }

    /// Check if the token carries an OAuth refresh credential
    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Check if the session can be renewed with the master token at `now`
    pub fn is_renewable_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.master_token, self.master_expires_at) {
            (Some(_), Some(expires_at)) => now < expires_at,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Check if the session can be renewed with the master token
    pub fn is_renewable(&self) -> bool {
        self.is_renewable_at(Utc::now())
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Get the authorization header value for query requests
    pub fn authorization_header(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.session_token)
    }
}
