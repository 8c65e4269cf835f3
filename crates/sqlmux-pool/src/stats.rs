//! Pool statistics
//!
//! Counters are plain atomics read with `Relaxed` ordering, so a snapshot
//! is best effort and may be momentarily inconsistent across fields.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use sqlmux_core::TargetIdentity;

/// Live counters of one pool entry
#[derive(Debug, Default)]
pub(crate) struct EntryCounters {
    pub active: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub created: AtomicU64,
    pub closed: AtomicU64,
    pub reused: AtomicU64,
    pub timeouts: AtomicU64,
    pub auth_failures: AtomicU64,
}

impl EntryCounters {
    pub fn checkout(&self, reused: bool) {
        self.active.fetch_add(1, Ordering::Relaxed);
        if reused {
            self.reused.fetch_add(1, Ordering::Relaxed);
        } else {
            self.created.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn checkin(&self) {
        // Saturate: a handle can outlive a drained entry
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Tracks a login in progress; decrements `in_flight` however the login ends
pub(crate) struct InFlight<'a> {
    counters: &'a EntryCounters,
}

impl<'a> InFlight<'a> {
    pub fn start(counters: &'a EntryCounters) -> Self {
        counters.in_flight.fetch_add(1, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Snapshot of one target identity's pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatistics {
    pub identity: TargetIdentity,
    pub max_pool_size: usize,
    pub active: usize,
    pub idle: usize,
    pub in_flight: usize,
    /// Capacity units not held by any session
    pub available: usize,
    pub created: u64,
    pub closed: u64,
    pub reused: u64,
    pub timeouts: u64,
    pub auth_failures: u64,
}

impl EntryStatistics {
    pub(crate) fn from_counters(
        identity: TargetIdentity,
        max_pool_size: usize,
        idle: usize,
        available: usize,
        counters: &EntryCounters,
    ) -> Self {
        Self {
            identity,
            max_pool_size,
            active: counters.active.load(Ordering::Relaxed),
            idle,
            in_flight: counters.in_flight.load(Ordering::Relaxed),
            available,
            created: counters.created.load(Ordering::Relaxed),
            closed: counters.closed.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            auth_failures: counters.auth_failures.load(Ordering::Relaxed),
        }
    }

    /// Sessions currently holding capacity
    pub fn total(&self) -> usize {
        self.active + self.idle + self.in_flight
    }
}

/// Sums across all entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolTotals {
    pub active: usize,
    pub idle: usize,
    pub in_flight: usize,
    pub created: u64,
    pub closed: u64,
    pub reused: u64,
    pub timeouts: u64,
    pub auth_failures: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStatistics {
    pub entries: Vec<EntryStatistics>,
    pub totals: PoolTotals,
}

impl PoolStatistics {
    pub(crate) fn from_entries(entries: Vec<EntryStatistics>) -> Self {
        let totals = entries.iter().fold(PoolTotals::default(), |mut t, e| {
            t.active += e.active;
            t.idle += e.idle;
            t.in_flight += e.in_flight;
            t.created += e.created;
            t.closed += e.closed;
            t.reused += e.reused;
            t.timeouts += e.timeouts;
            t.auth_failures += e.auth_failures;
            t
        });
        Self { entries, totals }
    }

    /// Statistics for one identity, if it has an entry
    pub fn entry(&self, identity: &TargetIdentity) -> Option<&EntryStatistics> {
        self.entries.iter().find(|e| &e.identity == identity)
    }
}
