//! GPU lock monitor.
//!
//! Independent periodic loop that scans all lock keys, checks heartbeat
//! freshness, and escalates through warning, soft-timeout and hard-timeout
//! actions, force-recovering locks whose holders died.

pub mod config;
pub mod escalation;
pub mod monitor;

pub use config::{MonitorConfig, TimeoutLevels};
pub use escalation::{classify, LockAge, LockState};
pub use monitor::{GpuLockMonitor, MonitorSummary};
