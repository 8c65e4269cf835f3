//! Connection and pool configuration
//!
//! Values only: these structs are deserialised by whatever layer parses
//! connection properties. Durations are expressed in whole seconds.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::token::TokenKind;
use crate::error::ConfigError;

/// Default maximum sessions per target identity
pub const DEFAULT_MAX_POOL_SIZE: usize = 10;
/// Default idle timeout (5 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Default maximum session lifetime (1 hour)
pub const DEFAULT_MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(3600);
/// Default time to wait for pool capacity
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default period of the background reclamation sweep
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(60);
/// Default timeout for a single login round trip
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(60);
/// Default time the SSO flow waits for the browser redirect
pub const DEFAULT_SSO_TIMEOUT: Duration = Duration::from_secs(120);

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Per-identity pool limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum sessions (active + idle + being created)
    pub max_pool_size: usize,
    /// Advisory only; the pool does not pre-warm sessions
    pub min_pool_size: usize,
    /// Idle sessions older than this are evicted by the sweep
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    /// Sessions older than this are never reused
    #[serde(with = "duration_secs")]
    pub max_connection_lifetime: Duration,
    /// How long `acquire` waits for capacity
    #[serde(with = "duration_secs")]
    pub connection_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub reclaim_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            min_pool_size: 0,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_connection_lifetime: DEFAULT_MAX_CONNECTION_LIFETIME,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
        }
    }
}

impl PoolSettings {
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn with_min_pool_size(mut self, size: usize) -> Self {
        self.min_pool_size = size;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_connection_lifetime = lifetime;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    /// Reject settings the pool cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_pool_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::Invalid {
                field: "min_pool_size",
                reason: format!(
                    "{} exceeds max_pool_size {}",
                    self.min_pool_size, self.max_pool_size
                ),
            });
        }
        if self.reclaim_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "reclaim_interval",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

fn default_sso_timeout() -> Duration {
    DEFAULT_SSO_TIMEOUT
}

/// Login method and its protocol-specific credentials
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "authenticator", rename_all = "snake_case")]
pub enum AuthMethod {
    Password {
        password: Zeroizing<String>,
    },
    KeyPair {
        private_key_path: PathBuf,
        #[serde(default)]
        private_key_passphrase: Option<Zeroizing<String>>,
    },
    #[serde(rename = "oauth")]
    OAuth {
        access_token: Zeroizing<String>,
        #[serde(default)]
        refresh_token: Option<Zeroizing<String>>,
        /// Token endpoint for the refresh grant
        #[serde(default)]
        token_endpoint: Option<String>,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        client_secret: Option<Zeroizing<String>>,
    },
    ExternalBrowser {
        /// Loopback port for the redirect listener (0 = OS-assigned)
        #[serde(default)]
        callback_port: u16,
        #[serde(default = "default_sso_timeout", with = "duration_secs")]
        sso_timeout: Duration,
        /// Identity-provider specific properties forwarded with the
        /// authenticator request
        #[serde(default)]
        properties: HashMap<String, String>,
    },
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        AuthMethod::Password {
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn key_pair(path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        AuthMethod::KeyPair {
            private_key_path: path.into(),
            private_key_passphrase: passphrase.map(Zeroizing::new),
        }
    }

    pub fn oauth(access_token: impl Into<String>) -> Self {
        AuthMethod::OAuth {
            access_token: Zeroizing::new(access_token.into()),
            refresh_token: None,
            token_endpoint: None,
            client_id: None,
            client_secret: None,
        }
    }

    pub fn external_browser() -> Self {
        AuthMethod::ExternalBrowser {
            callback_port: 0,
            sso_timeout: DEFAULT_SSO_TIMEOUT,
            properties: HashMap::new(),
        }
    }

    /// Token kind produced by this method
    pub fn token_kind(&self) -> TokenKind {
        match self {
            AuthMethod::Password { .. } => TokenKind::Password,
            AuthMethod::KeyPair { .. } => TokenKind::KeyPair,
            AuthMethod::OAuth { .. } => TokenKind::OAuth,
            AuthMethod::ExternalBrowser { .. } => TokenKind::ExternalBrowser,
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
            AuthMethod::KeyPair {
                private_key_path,
                private_key_passphrase,
            } => f
                .debug_struct("KeyPair")
                .field("private_key_path", private_key_path)
                .field("has_passphrase", &private_key_passphrase.is_some())
                .finish(),
            AuthMethod::OAuth {
                refresh_token,
                token_endpoint,
                client_id,
                ..
            } => f
                .debug_struct("OAuth")
                .field("has_refresh_token", &refresh_token.is_some())
                .field("token_endpoint", token_endpoint)
                .field("client_id", client_id)
                .finish(),
            AuthMethod::ExternalBrowser {
                callback_port,
                sso_timeout,
                properties,
            } => f
                .debug_struct("ExternalBrowser")
                .field("callback_port", callback_port)
                .field("sso_timeout", sso_timeout)
                .field("properties", properties)
                .finish(),
        }
    }
}

fn default_login_timeout() -> Duration {
    DEFAULT_LOGIN_TIMEOUT
}

fn default_application() -> String {
    "sqlmux".to_string()
}

/// Everything needed to open sessions for one target identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL of the warehouse; derived from the account when absent
    #[serde(default)]
    pub server_url: Option<String>,
    pub auth: AuthMethod,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default = "default_login_timeout", with = "duration_secs")]
    pub login_timeout: Duration,
    /// Reported to the server as CLIENT_APP_ID
    #[serde(default = "default_application")]
    pub application: String,
}

impl ConnectionConfig {
    pub fn new(auth: AuthMethod) -> Self {
        Self {
            server_url: None,
            auth,
            pool: PoolSettings::default(),
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            application: default_application(),
        }
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Base URL for `account`, without a trailing slash
    pub fn base_url(&self, account: &str) -> String {
        match &self.server_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", account.to_lowercase()),
        }
    }
}
