//! GPU lock manager.
//!
//! One explicit instance per process with an injected Redis client; call
//! sites receive a shared handle instead of going through a global.

use std::sync::Arc;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::GpuLockConfig;
use crate::critical::CriticalFailureRecorder;
use crate::error::{LockError, LockResult};
use crate::events::LockEventChannel;
use crate::guard::LockLease;
use crate::heartbeat::spawn_heartbeat;
use crate::keys::{heartbeat_key, is_heartbeat_key, ownership_token, LOCK_KEY_PREFIX};
use crate::scripts::LockScripts;
use crate::stats::{ExceptionStatsSnapshot, LockStatistics, StatsSnapshot};

/// Outcome of a conditional release attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStatus {
    /// The lock was ours and is now deleted.
    Released,
    /// The value did not match: expired, or another holder acquired since.
    NotOwner,
    /// The store was unreachable or the script failed.
    Error(String),
}

/// A lock key with no TTL set. Should not occur under correct operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZombieLock {
    pub lock_key: String,
    pub holder: Option<String>,
}

/// A lock held past the long-held age threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongHeldLock {
    pub lock_key: String,
    pub holder: Option<String>,
    pub held_secs: u64,
}

/// Read-only diagnostic snapshot of all lock keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub zombie_locks: Vec<ZombieLock>,
    pub long_held_locks: Vec<LongHeldLock>,
}

/// Distributed GPU lock manager.
pub struct GpuLockManager {
    client: redis::Client,
    config: GpuLockConfig,
    scripts: LockScripts,
    stats: Arc<LockStatistics>,
    events: LockEventChannel,
    critical: CriticalFailureRecorder,
}

impl GpuLockManager {
    /// Create a new manager with an injected Redis client.
    pub fn new(client: redis::Client, config: GpuLockConfig) -> Self {
        let events = LockEventChannel::with_client(client.clone());
        let critical = CriticalFailureRecorder::new(&config.critical_log_path);
        Self {
            client,
            config,
            scripts: LockScripts::new(),
            stats: Arc::new(LockStatistics::new()),
            events,
            critical,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> LockResult<Self> {
        let config = GpuLockConfig::from_env();
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self::new(client, config))
    }

    /// Replace the critical-failure recorder (custom path or alert hook).
    pub fn with_critical_recorder(mut self, recorder: CriticalFailureRecorder) -> Self {
        self.critical = recorder;
        self
    }

    pub fn config(&self) -> &GpuLockConfig {
        &self.config
    }

    pub(crate) fn critical_recorder(&self) -> &CriticalFailureRecorder {
        &self.critical
    }

    pub(crate) fn stats_handle(&self) -> &LockStatistics {
        &self.stats
    }

    /// Event channel for observers (waiters, metrics).
    pub fn events(&self) -> &LockEventChannel {
        &self.events
    }

    /// Acquire `lock_key` for `task_name`, polling until success or
    /// `max_wait_time` elapses.
    ///
    /// `task_name` must be unique per attempt (e.g. a task UUID). Returns
    /// `Ok(None)` on acquisition timeout; the successful case starts the
    /// heartbeat task and publishes an `Acquired` event.
    pub async fn acquire(
        &self,
        task_name: &str,
        lock_key: &str,
    ) -> LockResult<Option<LockLease>> {
        self.stats.record_attempt();

        let token = ownership_token(task_name);
        let deadline = tokio::time::Instant::now() + self.config.max_wait_time;
        let mut delay = self.config.poll_interval;

        let mut conn = self.connect().await?;

        loop {
            // SET key value NX EX ttl
            let set: Option<String> = redis::cmd("SET")
                .arg(lock_key)
                .arg(&token)
                .arg("NX")
                .arg("EX")
                .arg(self.config.lock_timeout.as_secs())
                .query_async(&mut conn)
                .await?;

            if set.is_some() {
                self.stats.record_success();
                info!(
                    lock_key = lock_key,
                    task_name = task_name,
                    "Acquired GPU lock"
                );

                let heartbeat = spawn_heartbeat(
                    self.client.clone(),
                    lock_key.to_string(),
                    self.config.heartbeat_interval,
                );
                self.events.acquired(lock_key, task_name).await.ok();

                return Ok(Some(LockLease::new(task_name, lock_key, heartbeat)));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                self.stats.record_timeout();
                warn!(
                    lock_key = lock_key,
                    task_name = task_name,
                    waited_secs = self.config.max_wait_time.as_secs(),
                    "Timed out waiting for GPU lock"
                );
                return Ok(None);
            }

            let sleep_for = delay.min(deadline - now);
            debug!(
                lock_key = lock_key,
                task_name = task_name,
                delay_ms = sleep_for.as_millis() as u64,
                "GPU lock busy, polling"
            );
            tokio::time::sleep(sleep_for).await;
            delay = self.config.next_poll_delay(delay);
        }
    }

    /// Release `lock_key` if it is still owned by `task_name`.
    ///
    /// Returns `true` only on an owner-verified delete. A value mismatch is
    /// logged and counted as an ownership violation, never raised; script or
    /// connection failures are swallowed into the `release_script_errors`
    /// counter. Safe to call twice.
    pub async fn release(&self, task_name: &str, lock_key: &str, reason: &str) -> bool {
        match self.try_release(task_name, lock_key, reason).await {
            ReleaseStatus::Released => true,
            ReleaseStatus::NotOwner | ReleaseStatus::Error(_) => false,
        }
    }

    /// Conditional release with a distinguishable outcome for the cleanup
    /// path. Counters and events are handled here.
    pub async fn try_release(
        &self,
        task_name: &str,
        lock_key: &str,
        reason: &str,
    ) -> ReleaseStatus {
        let token = ownership_token(task_name);

        let mut conn = match self.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                self.stats.record_release_script_error();
                error!(
                    lock_key = lock_key,
                    task_name = task_name,
                    "Release failed, Redis unreachable: {}", e
                );
                return ReleaseStatus::Error(e.to_string());
            }
        };

        match self.scripts.release(&mut conn, lock_key, &token).await {
            Ok(true) => {
                // The heartbeat task notices the missing lock key and exits,
                // but clearing its key now keeps the monitor's view clean.
                let _: Result<(), _> = conn.del(heartbeat_key(lock_key)).await;

                info!(
                    lock_key = lock_key,
                    task_name = task_name,
                    reason = reason,
                    "Released GPU lock"
                );
                self.events.released(lock_key, task_name, reason).await.ok();
                ReleaseStatus::Released
            }
            Ok(false) => {
                self.stats.record_ownership_violation();
                warn!(
                    lock_key = lock_key,
                    task_name = task_name,
                    "Release skipped: lock not owned (expired or re-acquired)"
                );
                ReleaseStatus::NotOwner
            }
            Err(e) => {
                self.stats.record_release_script_error();
                error!(
                    lock_key = lock_key,
                    task_name = task_name,
                    "Release script failed: {}", e
                );
                ReleaseStatus::Error(e.to_string())
            }
        }
    }

    /// Unconditionally delete `lock_key`, returning the prior holder.
    ///
    /// The monitor's hard-timeout action and the gateway's manual
    /// force-release endpoint both land here.
    pub async fn force_release(
        &self,
        lock_key: &str,
        reason: &str,
    ) -> LockResult<Option<String>> {
        let mut conn = self.connect().await?;

        let previous = self.scripts.force_release(&mut conn, lock_key).await?;
        let _: Result<(), _> = conn.del(heartbeat_key(lock_key)).await;

        warn!(
            lock_key = lock_key,
            previous_holder = ?previous,
            reason = reason,
            "Force-released GPU lock"
        );
        self.events
            .force_released(lock_key, previous.clone(), reason)
            .await
            .ok();

        Ok(previous)
    }

    /// Last-resort unconditional delete from the owning process's own
    /// exception path, when the normal release could not run.
    pub async fn emergency_release(
        &self,
        lock_key: &str,
        task_name: &str,
    ) -> LockResult<Option<String>> {
        let mut conn = self.connect().await?;

        let previous = self.scripts.force_release(&mut conn, lock_key).await?;
        let _: Result<(), _> = conn.del(heartbeat_key(lock_key)).await;

        self.stats.record_emergency_release();
        error!(
            lock_key = lock_key,
            task_name = task_name,
            previous_holder = ?previous,
            "Emergency GPU lock release"
        );
        self.events
            .emergency_released(lock_key, task_name, previous.clone())
            .await
            .ok();

        Ok(previous)
    }

    /// Scan all lock keys and report zombies (no TTL) and long-held locks.
    ///
    /// Read-only; safe to call concurrently from any number of callers.
    pub async fn health_check(&self) -> LockResult<HealthReport> {
        let mut conn = self.connect().await?;

        let mut zombie_locks = Vec::new();
        let mut long_held_locks = Vec::new();

        let pattern = format!("{}*", LOCK_KEY_PREFIX);
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                if is_heartbeat_key(&key) {
                    continue;
                }

                let ttl: i64 = conn.ttl(&key).await?;
                if ttl == -2 {
                    // Released between SCAN and TTL
                    continue;
                }

                let holder: Option<String> = conn.get(&key).await?;

                if ttl == -1 {
                    zombie_locks.push(ZombieLock {
                        lock_key: key,
                        holder,
                    });
                    continue;
                }

                // Lock TTLs are never refreshed, so remaining TTL encodes age.
                let age = self
                    .config
                    .lock_timeout
                    .as_secs()
                    .saturating_sub(ttl as u64);
                if age >= self.config.long_held_threshold.as_secs() {
                    long_held_locks.push(LongHeldLock {
                        lock_key: key,
                        holder,
                        held_secs: age,
                    });
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        let status = if zombie_locks.is_empty() {
            "healthy"
        } else {
            "degraded"
        };

        Ok(HealthReport {
            status: status.to_string(),
            zombie_locks,
            long_held_locks,
        })
    }

    /// Snapshot of the acquisition counters.
    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Snapshot of the exception counters.
    pub fn exception_statistics(&self) -> ExceptionStatsSnapshot {
        self.stats.exception_snapshot()
    }
}

impl GpuLockManager {
    async fn connect(&self) -> LockResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::connection_failed(format!("Redis connection failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_manager() -> GpuLockManager {
        // Nothing listens on port 1; every connection attempt is refused.
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        GpuLockManager::new(client, GpuLockConfig::default())
    }

    #[tokio::test]
    async fn test_acquire_reports_unreachable_store() {
        let manager = unreachable_manager();

        let err = manager.acquire("taskA", "gpu_lock:0").await.unwrap_err();
        assert!(matches!(err, LockError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_release_swallows_unreachable_store() {
        let manager = unreachable_manager();

        // Store errors never raise out of release; they are counted.
        assert!(!manager.release("taskA", "gpu_lock:0", "cleanup").await);
        assert_eq!(manager.exception_statistics().release_script_errors, 1);
    }
}
