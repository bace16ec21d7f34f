//! Process-local lock statistics.
//!
//! Counters live in memory and reset on restart; they are observability
//! aids, not a source of truth.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Cumulative acquisition and release counters for one manager instance.
#[derive(Debug, Default)]
pub struct LockStatistics {
    attempts: AtomicU64,
    successes: AtomicU64,
    timeouts: AtomicU64,
    normal_release_failures: AtomicU64,
    emergency_releases: AtomicU64,
    ownership_violations: AtomicU64,
    release_script_errors: AtomicU64,
}

/// Snapshot of acquisition counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub timeouts: u64,
}

/// Snapshot of exception counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionStatsSnapshot {
    pub normal_release_failures: u64,
    pub emergency_releases: u64,
    pub ownership_violations: u64,
    pub release_script_errors: u64,
}

impl LockStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_normal_release_failure(&self) {
        self.normal_release_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emergency_release(&self) {
        self.emergency_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ownership_violation(&self) {
        self.ownership_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release_script_error(&self) {
        self.release_script_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the acquisition counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Snapshot the exception counters.
    pub fn exception_snapshot(&self) -> ExceptionStatsSnapshot {
        ExceptionStatsSnapshot {
            normal_release_failures: self.normal_release_failures.load(Ordering::Relaxed),
            emergency_releases: self.emergency_releases.load(Ordering::Relaxed),
            ownership_violations: self.ownership_violations.load(Ordering::Relaxed),
            release_script_errors: self.release_script_errors.load(Ordering::Relaxed),
        }
    }
}
