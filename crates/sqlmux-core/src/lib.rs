//! # SqlMux Core Library
//!
//! Domain types shared by the authentication and pooling crates.
//!
//! ## Modules
//!
//! - `domain` - Target identities, authentication tokens, configuration
//! - `provider` - The `AuthenticationProvider` seam used by the pool
//! - `clock` - Injectable time source (system or manual)
//! - `error` - Authentication, pool and configuration errors
//! - `logging` - Tracing subscriber initialisation

pub mod clock;
pub mod domain;
pub mod error;
pub mod logging;
pub mod provider;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::*;
pub use error::{AuthError, ConfigError, PoolError};
pub use provider::{AuthenticationProvider, LoginRequest};
