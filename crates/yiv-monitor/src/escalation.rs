//! Per-lock escalation state machine.
//!
//! The state is recomputed from scratch every monitoring tick; the action
//! for each state is selected by exhaustive matching in the monitor loop.
//! Heartbeat freshness is checked before lock age so a slow-but-alive task
//! is never escalated, and a truly dead task's lock is not left held for
//! the full TTL window.

use std::time::Duration;

use crate::config::TimeoutLevels;

/// Lock age in seconds. A key with no TTL has no derivable age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAge {
    Known(u64),
    /// Zombie key (no expiry set); treated as older than every threshold.
    NoTtl,
}

impl LockAge {
    fn exceeds(&self, threshold: Duration) -> bool {
        match self {
            LockAge::Known(secs) => *secs >= threshold.as_secs(),
            LockAge::NoTtl => true,
        }
    }
}

/// Escalation state of a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Young, or heartbeat fresh.
    Healthy,
    /// Past the warning threshold; log only.
    Warning,
    /// Past the soft timeout with a stale heartbeat; request graceful
    /// termination.
    SoftTimeout,
    /// Past the hard timeout with a stale heartbeat; force-release.
    HardTimeout,
}

/// Classify a lock from its age and heartbeat freshness.
///
/// `heartbeat_age` is `None` when no heartbeat key exists (counts as
/// stale). An actively-heartbeating lock is Healthy regardless of age.
pub fn classify(
    age: LockAge,
    heartbeat_age: Option<Duration>,
    levels: &TimeoutLevels,
    heartbeat_timeout: Duration,
) -> LockState {
    let heartbeat_fresh = matches!(heartbeat_age, Some(hb) if hb < heartbeat_timeout);
    if heartbeat_fresh {
        return LockState::Healthy;
    }

    if !age.exceeds(levels.warning) {
        LockState::Healthy
    } else if !age.exceeds(levels.soft_timeout) {
        LockState::Warning
    } else if !age.exceeds(levels.hard_timeout) {
        LockState::SoftTimeout
    } else {
        LockState::HardTimeout
    }
}
