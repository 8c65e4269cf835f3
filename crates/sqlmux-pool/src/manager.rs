//! Pool manager: registry of per-identity entries
//!
//! Entries are created on first use of an identity and live until
//! shutdown. Reclamation runs on a background task that only holds a weak
//! reference to the registry, so dropping the manager stops it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use sqlmux_core::{
    AuthError, AuthenticationProvider, Clock, ConnectionConfig, PoolError, SystemClock,
    TargetIdentity,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entry::PoolEntry;
use crate::session::SessionHandle;
use crate::stats::PoolStatistics;

struct Registry {
    entries: DashMap<TargetIdentity, Arc<PoolEntry>>,
    provider: Arc<dyn AuthenticationProvider>,
    clock: Arc<dyn Clock>,
    shutdown: AtomicBool,
}

impl Registry {
    fn sweep(&self) -> usize {
        // Collect first so no shard lock is held while sweeping
        let entries: Vec<Arc<PoolEntry>> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.iter().map(|entry| entry.sweep()).sum()
    }
}

struct Reclaimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PoolManager {
    registry: Arc<Registry>,
    reclaim_interval: Option<Duration>,
    reclaimer: Mutex<Option<Reclaimer>>,
}

impl PoolManager {
    pub fn new(provider: Arc<dyn AuthenticationProvider>) -> Self {
        Self {
            registry: Arc::new(Registry {
                entries: DashMap::new(),
                provider,
                clock: Arc::new(SystemClock),
                shutdown: AtomicBool::new(false),
            }),
            reclaim_interval: None,
            reclaimer: Mutex::new(None),
        }
    }

    /// Use `clock` for token expiry and session ages
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.registry = Arc::new(Registry {
            entries: DashMap::new(),
            provider: self.registry.provider.clone(),
            clock,
            shutdown: AtomicBool::new(false),
        });
        self
    }

    /// Sweep period; defaults to the first acquired identity's
    /// `reclaim_interval`
    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = Some(interval);
        self
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.shutdown.load(Ordering::SeqCst)
    }

    /// Check out a session for `identity`, logging in with `config` if no
    /// idle session is reusable. `timeout` defaults to the pool's
    /// connection timeout.
    pub async fn acquire(
        &self,
        identity: &TargetIdentity,
        config: &ConnectionConfig,
        timeout: Option<Duration>,
    ) -> Result<SessionHandle, PoolError> {
        self.acquire_with_cancel(identity, config, timeout, CancellationToken::new())
            .await
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`PoolError::Cancelled`] when `cancel` fires during the wait
    pub async fn acquire_with_cancel(
        &self,
        identity: &TargetIdentity,
        config: &ConnectionConfig,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<SessionHandle, PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::TeardownInProgress);
        }

        let entry = self.entry_for(identity, config)?;
        // A shutdown that ran after the first check may have missed this entry
        if self.is_shut_down() {
            entry.drain();
            return Err(PoolError::TeardownInProgress);
        }
        self.ensure_reclaimer(config.pool.reclaim_interval);

        let timeout = timeout.unwrap_or(entry.settings().connection_timeout);
        entry.acquire(timeout, &cancel).await
    }

    /// Return a session for reuse
    pub fn release(&self, session: SessionHandle) {
        session.release();
    }

    /// Discard a session
    pub fn invalidate(&self, session: SessionHandle) {
        session.invalidate();
    }

    /// Replace the session's token through the provider: the OAuth refresh
    /// grant when the token has a refresh token, otherwise master-token
    /// renewal
    pub async fn refresh_session(&self, session: &mut SessionHandle) -> Result<(), PoolError> {
        let entry = session.entry().clone();
        let current = session.token().clone();
        let provider = entry.provider();
        let now = entry.clock().now();

        let refreshed = if current.is_refreshable() {
            provider.refresh(entry.request(), &current).await
        } else if current.is_renewable_at(now) {
            provider.renew(entry.request(), &current).await
        } else {
            Err(AuthError::NotRefreshable)
        };

        match refreshed {
            Ok(token) => {
                info!(
                    identity = %entry.identity(),
                    session_id = %session.id(),
                    expires_at = %token.expires_at,
                    "[PoolManager] Session token refreshed"
                );
                provider.invalidate(&current);
                session.replace_token(token);
                Ok(())
            }
            Err(e) => {
                warn!(
                    identity = %entry.identity(),
                    session_id = %session.id(),
                    error = %e,
                    "[PoolManager] Session token refresh failed"
                );
                Err(PoolError::Auth(e))
            }
        }
    }

    pub fn statistics(&self) -> PoolStatistics {
        let mut entries: Vec<_> = self
            .registry
            .entries
            .iter()
            .map(|e| e.value().statistics())
            .collect();
        entries.sort_by_key(|e| e.identity.to_string());
        PoolStatistics::from_entries(entries)
    }

    /// Run one reclamation sweep now; returns the number of evicted sessions
    pub fn reclaim_now(&self) -> usize {
        self.registry.sweep()
    }

    /// Stop reclamation, fail waiters, and dispose idle sessions.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.registry.shutdown.swap(true, Ordering::SeqCst) {
            debug!("[PoolManager] Shutdown already done");
            return;
        }
        info!("[PoolManager] Shutting down");

        let reclaimer = self.reclaimer.lock().take();
        if let Some(reclaimer) = reclaimer {
            reclaimer.cancel.cancel();
            if let Err(e) = reclaimer.handle.await {
                warn!("[PoolManager] Reclaimer task ended abnormally: {}", e);
            }
        }

        let entries: Vec<Arc<PoolEntry>> = self
            .registry
            .entries
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let drained: usize = entries.iter().map(|entry| entry.drain()).sum();

        info!(
            entries = entries.len(),
            drained, "[PoolManager] Shutdown complete"
        );
    }

    fn entry_for(
        &self,
        identity: &TargetIdentity,
        config: &ConnectionConfig,
    ) -> Result<Arc<PoolEntry>, PoolError> {
        if let Some(entry) = self.registry.entries.get(identity) {
            return Ok(entry.value().clone());
        }

        config.pool.validate()?;
        let entry = self
            .registry
            .entries
            .entry(identity.clone())
            .or_insert_with(|| {
                info!(
                    identity = %identity,
                    max_pool_size = config.pool.max_pool_size,
                    "[PoolManager] Created pool entry"
                );
                Arc::new(PoolEntry::new(
                    identity.clone(),
                    config.clone(),
                    self.registry.provider.clone(),
                    self.registry.clock.clone(),
                ))
            })
            .value()
            .clone();
        Ok(entry)
    }

    fn ensure_reclaimer(&self, default_interval: Duration) {
        let mut slot = self.reclaimer.lock();
        if slot.is_some() || self.is_shut_down() {
            return;
        }

        let interval = self.reclaim_interval.unwrap_or(default_interval);
        let cancel = CancellationToken::new();
        let handle = spawn_reclaimer(Arc::downgrade(&self.registry), interval, cancel.clone());
        *slot = Some(Reclaimer { cancel, handle });
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        if let Some(reclaimer) = self.reclaimer.get_mut().take() {
            reclaimer.cancel.cancel();
        }
    }
}

fn spawn_reclaimer(
    registry: Weak<Registry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "[Reclaimer] Idle session reclamation started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(registry) = registry.upgrade() else {
                break;
            };
            if registry.shutdown.load(Ordering::Acquire) {
                break;
            }

            let evicted = registry.sweep();
            if evicted > 0 {
                debug!(evicted, "[Reclaimer] Evicted idle sessions");
            }
        }

        info!("[Reclaimer] Idle session reclamation stopped");
    })
}
