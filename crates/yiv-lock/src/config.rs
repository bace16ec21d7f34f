//! GPU lock configuration.

use std::path::PathBuf;
use std::time::Duration;

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

/// Lock manager configuration.
#[derive(Debug, Clone)]
pub struct GpuLockConfig {
    /// Redis URL
    pub redis_url: String,
    /// Initial delay between acquisition attempts
    pub poll_interval: Duration,
    /// Maximum time to poll before giving up on acquisition
    pub max_wait_time: Duration,
    /// Lock TTL; the store reclaims the lock after this no matter what
    pub lock_timeout: Duration,
    /// Double the poll delay after each failed attempt
    pub exponential_backoff: bool,
    /// Cap on the poll delay when backoff is enabled
    pub max_poll_interval: Duration,
    /// Interval between heartbeat refreshes while a lock is held
    pub heartbeat_interval: Duration,
    /// Heartbeat older than this counts as stale (liveness, not hold time)
    pub heartbeat_timeout: Duration,
    /// Locks held longer than this show up in health checks as long-held
    pub long_held_threshold: Duration,
    /// Append-only log for critical release failures
    pub critical_log_path: PathBuf,
}

impl Default for GpuLockConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            poll_interval: Duration::from_secs(2),
            max_wait_time: Duration::from_secs(300), // 5 minutes
            lock_timeout: Duration::from_secs(3600), // 1 hour
            exponential_backoff: true,
            max_poll_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(300),
            long_held_threshold: Duration::from_secs(1800),
            critical_log_path: PathBuf::from("/tmp/yiv_gpu_lock_failures.log"),
        }
    }
}

impl GpuLockConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            poll_interval: env_secs("GPU_LOCK_POLL_INTERVAL_SECS", 2),
            max_wait_time: env_secs("GPU_LOCK_MAX_WAIT_SECS", 300),
            lock_timeout: env_secs("GPU_LOCK_TIMEOUT_SECS", 3600),
            exponential_backoff: std::env::var("GPU_LOCK_EXPONENTIAL_BACKOFF")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            max_poll_interval: env_secs("GPU_LOCK_MAX_POLL_INTERVAL_SECS", 30),
            heartbeat_interval: env_secs("GPU_LOCK_HEARTBEAT_INTERVAL_SECS", 60),
            heartbeat_timeout: env_secs("GPU_LOCK_HEARTBEAT_TIMEOUT_SECS", 300),
            long_held_threshold: env_secs("GPU_LOCK_LONG_HELD_SECS", 1800),
            critical_log_path: std::env::var("GPU_LOCK_CRITICAL_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/yiv_gpu_lock_failures.log")),
        }
    }

    /// Delay before the next acquisition attempt, given the current delay.
    pub fn next_poll_delay(&self, current: Duration) -> Duration {
        if self.exponential_backoff {
            (current * 2).min(self.max_poll_interval)
        } else {
            current
        }
    }
}
