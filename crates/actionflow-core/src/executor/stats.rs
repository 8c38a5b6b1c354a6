//! Executor counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters shared by all workers of one executor.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    received: AtomicU64,
    succeeded: AtomicU64,
    simulated: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    permanent_failures: AtomicU64,
    duplicates: AtomicU64,
}

/// Point-in-time copy of [`ExecutorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub succeeded: u64,
    pub simulated: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub permanent_failures: u64,
    pub duplicates: u64,
}

impl ExecutorStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_simulated(&self) {
        self.simulated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_permanent_failure(&self) {
        self.permanent_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            simulated: self.simulated.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}
