//! Monitor configuration.

use std::time::Duration;

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

/// Escalation thresholds on lock age.
#[derive(Debug, Clone)]
pub struct TimeoutLevels {
    /// Log-only threshold
    pub warning: Duration,
    /// Graceful-termination threshold
    pub soft_timeout: Duration,
    /// Force-release threshold
    pub hard_timeout: Duration,
}

impl Default for TimeoutLevels {
    fn default() -> Self {
        Self {
            warning: Duration::from_secs(900),
            soft_timeout: Duration::from_secs(1800),
            hard_timeout: Duration::from_secs(2700),
        }
    }
}

/// Monitor loop configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between monitoring ticks
    pub monitor_interval: Duration,
    /// Escalation thresholds
    pub timeout_levels: TimeoutLevels,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(30),
            timeout_levels: TimeoutLevels::default(),
        }
    }
}

impl MonitorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            monitor_interval: env_secs("GPU_LOCK_MONITOR_INTERVAL_SECS", 30),
            timeout_levels: TimeoutLevels {
                warning: env_secs("GPU_LOCK_WARNING_SECS", 900),
                soft_timeout: env_secs("GPU_LOCK_SOFT_TIMEOUT_SECS", 1800),
                hard_timeout: env_secs("GPU_LOCK_HARD_TIMEOUT_SECS", 2700),
            },
        }
    }
}
