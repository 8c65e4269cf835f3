//! Pooled sessions and the caller-facing handle

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlmux_core::{AuthenticationToken, TargetIdentity};
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::entry::PoolEntry;

/// One unit of an entry's capacity. Returned to the gate on drop.
#[derive(Debug)]
pub(crate) struct CapacityUnit {
    _permit: OwnedSemaphorePermit,
}

impl CapacityUnit {
    pub(crate) fn new(permit: OwnedSemaphorePermit) -> Self {
        Self { _permit: permit }
    }
}

pub(crate) fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

/// An authenticated session. Lives either in a caller's [`SessionHandle`]
/// or in its entry's idle stack.
pub struct PooledSession {
    id: Uuid,
    token: Arc<AuthenticationToken>,
    identity: TargetIdentity,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
    disposed: bool,
    capacity: Option<CapacityUnit>,
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.id)
            .field("identity", &self.identity.to_string())
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .field("expires_at", &self.token.expires_at)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl PooledSession {
    pub(crate) fn new(
        token: AuthenticationToken,
        identity: TargetIdentity,
        capacity: CapacityUnit,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: Arc::new(token),
            identity,
            created_at: now,
            last_used: now,
            disposed: false,
            capacity: Some(capacity),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn token(&self) -> &Arc<AuthenticationToken> {
        &self.token
    }

    pub fn identity(&self) -> &TargetIdentity {
        &self.identity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn age(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.created_at
    }

    pub fn idle_time(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.last_used
    }

    /// Usable at `now`: token unexpired, younger than `max_lifetime`, not disposed
    pub fn is_valid(&self, now: DateTime<Utc>, max_lifetime: Duration) -> bool {
        !self.disposed && !self.token.is_expired_at(now) && self.age(now) < to_chrono(max_lifetime)
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used = now;
    }

    pub(crate) fn replace_token(&mut self, token: AuthenticationToken) {
        self.token = Arc::new(token);
    }

    /// Mark unusable and give the capacity back
    pub(crate) fn dispose(&mut self) {
        self.disposed = true;
        self.capacity = None;
    }
}

/// A session checked out of the pool.
///
/// Dropping the handle returns the session to its pool, as [`release`]
/// does.
///
/// [`release`]: SessionHandle::release
pub struct SessionHandle {
    session: Option<PooledSession>,
    entry: Arc<PoolEntry>,
    reused: bool,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session", &self.session)
            .field("reused", &self.reused)
            .finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(session: PooledSession, entry: Arc<PoolEntry>, reused: bool) -> Self {
        Self {
            session: Some(session),
            entry,
            reused,
        }
    }

    fn session(&self) -> &PooledSession {
        self.session.as_ref().expect("session already returned")
    }

    pub fn id(&self) -> Uuid {
        self.session().id()
    }

    pub fn token(&self) -> &Arc<AuthenticationToken> {
        self.session().token()
    }

    pub fn identity(&self) -> &TargetIdentity {
        self.session().identity()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.session().created_at()
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        self.session().last_used()
    }

    /// Whether the session came from the idle stack rather than a fresh login
    pub fn was_reused(&self) -> bool {
        self.reused
    }

    /// Validity against the pool's clock and lifetime limit
    pub fn is_valid(&self) -> bool {
        self.entry.is_session_valid(self.session())
    }

    /// Swap in a refreshed or renewed token
    pub fn replace_token(&mut self, token: AuthenticationToken) {
        if let Some(session) = self.session.as_mut() {
            session.replace_token(token);
        }
    }

    pub(crate) fn entry(&self) -> &Arc<PoolEntry> {
        &self.entry
    }

    /// Return the session to the pool for reuse
    pub fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.entry.release(session);
        }
    }

    /// Discard the session; it will never be handed out again
    pub fn invalidate(mut self) {
        if let Some(session) = self.session.take() {
            self.entry.invalidate(session);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.entry.release(session);
        }
    }
}
