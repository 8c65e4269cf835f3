//! # SqlMux Authentication
//!
//! Login protocols for the warehouse session service, all producing an
//! [`AuthenticationToken`](sqlmux_core::AuthenticationToken):
//!
//! - `password` - username/password
//! - `keypair` - RS256 JWT signed with the user's RSA key
//! - `oauth` - externally obtained access token, with refresh-token grant
//! - `sso` - external browser SAML login via a loopback redirect listener
//!
//! [`WarehouseAuthenticator`] dispatches on the configured method and is the
//! provider the pool uses.

mod authenticator;
pub mod keypair;
pub mod login;
mod oauth;
mod password;
pub mod sso;

pub use authenticator::WarehouseAuthenticator;
pub use login::LoginClient;
pub use sso::{BrowserLauncher, CallbackListener, PrintUrl, RecordingBrowser, SystemBrowser};
