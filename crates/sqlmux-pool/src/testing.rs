//! Scripted provider for pool unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlmux_core::{
    AuthError, AuthMethod, AuthenticationProvider, AuthenticationToken, Clock, ConnectionConfig,
    LoginRequest, ManualClock, PoolSettings, TokenKind,
};

pub(crate) fn config_with(pool: PoolSettings) -> ConnectionConfig {
    ConnectionConfig::new(AuthMethod::password("pw")).with_pool(pool)
}

pub(crate) struct ScriptedProvider {
    clock: ManualClock,
    validity: chrono::Duration,
    login_delay: Option<Duration>,
    failures_left: AtomicUsize,
    logins: AtomicUsize,
    refreshes: AtomicUsize,
    invalidated: AtomicUsize,
    refresh_tokens: bool,
}

impl ScriptedProvider {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            validity: chrono::Duration::hours(1),
            login_delay: None,
            failures_left: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            invalidated: AtomicUsize::new(0),
            refresh_tokens: false,
        }
    }

    pub fn with_validity_secs(mut self, secs: i64) -> Self {
        self.validity = chrono::Duration::seconds(secs);
        self
    }

    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = Some(delay);
        self
    }

    /// Issue tokens that carry a refresh token
    pub fn with_refresh_tokens(mut self) -> Self {
        self.refresh_tokens = true;
        self
    }

    pub fn failing_logins(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn invalidated(&self) -> usize {
        self.invalidated.load(Ordering::SeqCst)
    }

    fn issue(&self, n: usize) -> AuthenticationToken {
        let token = AuthenticationToken::new(
            TokenKind::Password,
            format!("session-{}", n),
            self.clock.now(),
            self.validity,
        );
        if self.refresh_tokens {
            token.with_refresh_token(Some(format!("refresh-{}", n)))
        } else {
            token
        }
    }
}

#[async_trait]
impl AuthenticationProvider for ScriptedProvider {
    async fn authenticate(&self, _request: &LoginRequest) -> Result<AuthenticationToken, AuthError> {
        if let Some(delay) = self.login_delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AuthError::invalid_credentials("password", "Incorrect username or password"));
        }

        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.issue(n))
    }

    async fn refresh(
        &self,
        _request: &LoginRequest,
        token: &AuthenticationToken,
    ) -> Result<AuthenticationToken, AuthError> {
        if !token.is_refreshable() {
            return Err(AuthError::NotRefreshable);
        }
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.issue(1000 + n))
    }

    fn invalidate(&self, _token: &AuthenticationToken) {
        self.invalidated.fetch_add(1, Ordering::SeqCst);
    }
}
