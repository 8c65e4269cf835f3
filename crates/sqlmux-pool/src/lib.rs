//! # SqlMux Session Pool
//!
//! Bounded pools of authenticated warehouse sessions, one per
//! [`TargetIdentity`](sqlmux_core::TargetIdentity).
//!
//! - `manager` - Registry of entries, acquisition API, background reclamation
//! - `entry` - One identity's capacity gate and idle stack
//! - `session` - Pooled sessions and the caller-facing `SessionHandle`
//! - `stats` - Counters and statistics snapshots
//!
//! ```ignore
//! let pool = PoolManager::new(Arc::new(WarehouseAuthenticator::new()));
//! let session = pool.acquire(&identity, &config, None).await?;
//! let header = session.token().authorization_header();
//! // ... run queries ...
//! pool.release(session);
//! pool.shutdown().await;
//! ```

mod entry;
mod manager;
mod session;
mod stats;

#[cfg(test)]
mod testing;

pub use entry::PoolEntry;
pub use manager::PoolManager;
pub use session::{PooledSession, SessionHandle};
pub use stats::{EntryStatistics, PoolStatistics, PoolTotals};
