//! Per-identity pool entry
//!
//! Every session that exists for an identity (checked out, idle, or still
//! logging in) holds one permit of the entry's capacity gate, so the gate
//! alone bounds the entry at `max_pool_size`. Idle sessions are reused
//! newest-first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlmux_core::{
    AuthenticationProvider, Clock, ConnectionConfig, LoginRequest, PoolError, PoolSettings,
    TargetIdentity,
};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{to_chrono, CapacityUnit, PooledSession, SessionHandle};
use crate::stats::{EntryCounters, EntryStatistics, InFlight};

pub struct PoolEntry {
    request: LoginRequest,
    settings: PoolSettings,
    gate: Arc<Semaphore>,
    idle: Mutex<Vec<PooledSession>>,
    /// Signalled when `release` parks a session in the idle stack
    idle_available: Notify,
    closed: AtomicBool,
    counters: EntryCounters,
    provider: Arc<dyn AuthenticationProvider>,
    clock: Arc<dyn Clock>,
}

impl PoolEntry {
    pub(crate) fn new(
        identity: TargetIdentity,
        config: ConnectionConfig,
        provider: Arc<dyn AuthenticationProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = config.pool.clone();
        Self {
            gate: Arc::new(Semaphore::new(settings.max_pool_size)),
            request: LoginRequest::new(identity, config),
            settings,
            idle: Mutex::new(Vec::new()),
            idle_available: Notify::new(),
            closed: AtomicBool::new(false),
            counters: EntryCounters::default(),
            provider,
            clock,
        }
    }

    pub fn identity(&self) -> &TargetIdentity {
        &self.request.identity
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub(crate) fn request(&self) -> &LoginRequest {
        &self.request
    }

    pub(crate) fn provider(&self) -> &Arc<dyn AuthenticationProvider> {
        &self.provider
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub(crate) fn is_session_valid(&self, session: &PooledSession) -> bool {
        session.is_valid(self.clock.now(), self.settings.max_connection_lifetime)
    }

    /// Check out a session, reusing an idle one when possible.
    ///
    /// Waits at most `timeout` for capacity. Only the wait observes
    /// `cancel`; a login already under way runs to completion.
    pub async fn acquire(
        self: &Arc<Self>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<SessionHandle, PoolError> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            // Register for wakeups before looking at the stack, so a release
            // between the look and the wait still reaches this waiter
            let notified = self.idle_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(PoolError::TeardownInProgress);
            }

            if let Some(session) = self.pop_idle() {
                return Ok(self.checkout(session, true));
            }

            let permit = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(identity = %self.identity(), "[PoolEntry] Acquire cancelled");
                    return Err(PoolError::Cancelled);
                }
                permit = self.gate.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Err(PoolError::TeardownInProgress),
                },
                _ = &mut notified => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    self.counters.record_timeout();
                    let waited = started.elapsed();
                    warn!(
                        identity = %self.identity(),
                        waited_ms = waited.as_millis() as u64,
                        max_pool_size = self.settings.max_pool_size,
                        "[PoolEntry] Pool capacity exhausted"
                    );
                    return Err(PoolError::CapacityExhausted { waited });
                }
            };

            // A session may have been parked while we waited for the permit
            if let Some(session) = self.pop_idle() {
                drop(permit);
                return Ok(self.checkout(session, true));
            }

            return self.create(permit).await;
        }
    }

    async fn create(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> Result<SessionHandle, PoolError> {
        let result = {
            let _in_flight = InFlight::start(&self.counters);
            self.provider.authenticate(&self.request).await
        };

        match result {
            Ok(token) => {
                let session = PooledSession::new(
                    token,
                    self.identity().clone(),
                    CapacityUnit::new(permit),
                    self.clock.now(),
                );
                info!(
                    identity = %self.identity(),
                    session_id = %session.id(),
                    expires_at = %session.token().expires_at,
                    "[PoolEntry] Created session"
                );
                Ok(self.checkout(session, false))
            }
            Err(e) => {
                self.counters.record_auth_failure();
                warn!(identity = %self.identity(), error = %e, "[PoolEntry] Login failed");
                // Capacity goes back before the error reaches the caller
                drop(permit);
                Err(PoolError::Auth(e))
            }
        }
    }

    fn checkout(self: &Arc<Self>, session: PooledSession, reused: bool) -> SessionHandle {
        self.counters.checkout(reused);
        if reused {
            debug!(
                identity = %self.identity(),
                session_id = %session.id(),
                "[PoolEntry] Reusing idle session"
            );
        }
        SessionHandle::new(session, Arc::clone(self), reused)
    }

    /// Pop idle sessions until a valid one turns up, disposing the rest
    fn pop_idle(&self) -> Option<PooledSession> {
        let now = self.clock.now();
        loop {
            let popped = self.idle.lock().pop();
            let mut session = popped?;

            if session.is_valid(now, self.settings.max_connection_lifetime) {
                session.touch(now);
                return Some(session);
            }

            debug!(
                identity = %self.identity(),
                session_id = %session.id(),
                "[PoolEntry] Discarding invalid idle session"
            );
            self.dispose(session);
        }
    }

    pub(crate) fn release(&self, mut session: PooledSession) {
        self.counters.checkin();

        let now = self.clock.now();
        if !session.is_valid(now, self.settings.max_connection_lifetime) {
            debug!(
                identity = %self.identity(),
                session_id = %session.id(),
                "[PoolEntry] Released session no longer valid"
            );
            self.dispose(session);
            return;
        }

        session.touch(now);
        {
            let mut idle = self.idle.lock();
            // Checked under the idle lock so a concurrent drain cannot miss it
            if !self.is_closed() {
                idle.push(session);
                drop(idle);
                self.idle_available.notify_one();
                return;
            }
        }
        self.dispose(session);
    }

    pub(crate) fn invalidate(&self, session: PooledSession) {
        self.counters.checkin();
        debug!(
            identity = %self.identity(),
            session_id = %session.id(),
            "[PoolEntry] Session invalidated"
        );
        self.dispose(session);
    }

    fn dispose(&self, mut session: PooledSession) {
        self.provider.invalidate(session.token());
        session.dispose();
        self.counters.record_closed();
    }

    /// Evict idle sessions past the idle timeout or lifetime, or otherwise
    /// invalid. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let idle_timeout = to_chrono(self.settings.idle_timeout);
        let max_lifetime = self.settings.max_connection_lifetime;

        // Only sessions present now; later releases wait for the next sweep
        let present = self.idle.lock().len();
        let mut survivors = Vec::with_capacity(present);
        let mut evicted = 0;

        for _ in 0..present {
            let Some(session) = self.idle.lock().pop() else {
                break;
            };

            if session.idle_time(now) > idle_timeout || !session.is_valid(now, max_lifetime) {
                debug!(
                    identity = %self.identity(),
                    session_id = %session.id(),
                    idle_secs = session.idle_time(now).num_seconds(),
                    "[PoolEntry] Evicting idle session"
                );
                self.dispose(session);
                evicted += 1;
            } else {
                survivors.push(session);
            }
        }

        self.restore_idle(survivors);
        evicted
    }

    /// Put swept survivors back under anything released during the sweep,
    /// keeping their original order
    fn restore_idle(&self, survivors: Vec<PooledSession>) {
        if survivors.is_empty() {
            return;
        }
        let restored = survivors.len();
        {
            let mut idle = self.idle.lock();
            if self.is_closed() {
                drop(idle);
                for session in survivors {
                    self.dispose(session);
                }
                return;
            }
            // Survivors were popped newest-first
            let released_since = std::mem::take(&mut *idle);
            idle.extend(survivors.into_iter().rev());
            idle.extend(released_since);
        }
        for _ in 0..restored {
            self.idle_available.notify_one();
        }
    }

    /// Close the gate and dispose every idle session. Waiters fail with
    /// `TeardownInProgress`; checked-out sessions are disposed on release.
    pub(crate) fn drain(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.gate.close();
        self.idle_available.notify_waiters();

        let drained: Vec<PooledSession> = std::mem::take(&mut *self.idle.lock());
        let count = drained.len();
        for session in drained {
            self.dispose(session);
        }

        if count > 0 {
            info!(identity = %self.identity(), count, "[PoolEntry] Drained idle sessions");
        }
        count
    }

    pub fn statistics(&self) -> EntryStatistics {
        EntryStatistics::from_counters(
            self.identity().clone(),
            self.settings.max_pool_size,
            self.idle_count(),
            self.gate.available_permits(),
            &self.counters,
        )
    }
}
