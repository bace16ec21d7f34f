//! Redis-backed distributed GPU lock manager.
//!
//! This crate provides:
//! - Mutual exclusion per GPU slot via SET NX EX with a TTL backstop
//! - Atomic (server-side script) conditional and force release
//! - Heartbeat-based liveness, decoupled from the lock TTL
//! - Lock lifecycle events via Redis Pub/Sub
//! - A three-layer cleanup path with emergency release and a
//!   critical-failure log

pub mod config;
pub mod critical;
pub mod error;
pub mod events;
pub mod guard;
pub mod heartbeat;
pub mod keys;
pub mod manager;
pub mod scripts;
pub mod stats;

pub use config::GpuLockConfig;
pub use critical::{AlertHook, CriticalFailureRecord, CriticalFailureRecorder};
pub use error::{LockError, LockResult};
pub use events::{LockEvent, LockEventChannel, EVENTS_CHANNEL};
pub use guard::{CleanupHook, LockLease, ReleaseOutcome};
pub use heartbeat::{spawn_heartbeat, FailureTracker, HeartbeatHandle};
pub use keys::{gpu_lock_key, heartbeat_key, is_heartbeat_key, ownership_token};
pub use manager::{GpuLockManager, HealthReport, LongHeldLock, ReleaseStatus, ZombieLock};
pub use scripts::LockScripts;
pub use stats::{ExceptionStatsSnapshot, LockStatistics, StatsSnapshot};
