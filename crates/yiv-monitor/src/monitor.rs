//! Background loop that scans lock keys and escalates stuck locks.
//!
//! Runs as its own long-lived process, independent of every lock holder.
//! Each tick it recomputes the escalation state of every lock from the
//! store (lock age from remaining TTL, liveness from the heartbeat key)
//! and acts on it: log, request graceful termination, or force-release.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use redis::AsyncCommands;
use serde::Serialize;
use tokio::time::interval;
use tracing::{error, info, warn};

use yiv_lock::keys::{heartbeat_key, is_heartbeat_key, LOCK_KEY_PREFIX};
use yiv_lock::{GpuLockConfig, GpuLockManager};

use crate::config::MonitorConfig;
use crate::escalation::{classify, LockAge, LockState};

/// Result of a single monitoring tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorSummary {
    pub scanned: u64,
    pub warnings: u64,
    pub soft_timeouts: u64,
    pub forced_releases: u64,
}

/// GPU lock monitor service.
pub struct GpuLockMonitor {
    client: redis::Client,
    manager: GpuLockManager,
    lock_config: GpuLockConfig,
    config: MonitorConfig,
    enabled: bool,
    total_forced: AtomicU64,
}

impl GpuLockMonitor {
    /// Create a new monitor.
    pub fn new(
        client: redis::Client,
        lock_config: GpuLockConfig,
        config: MonitorConfig,
    ) -> Self {
        let enabled = std::env::var("GPU_LOCK_MONITOR_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true); // Enabled by default

        let manager = GpuLockManager::new(client.clone(), lock_config.clone());

        Self {
            client,
            manager,
            lock_config,
            config,
            enabled,
            total_forced: AtomicU64::new(0),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let lock_config = GpuLockConfig::from_env();
        let client = redis::Client::open(lock_config.redis_url.as_str())?;
        Ok(Self::new(client, lock_config, MonitorConfig::from_env()))
    }

    /// Cumulative force-release count since this monitor started.
    pub fn total_forced_releases(&self) -> u64 {
        self.total_forced.load(Ordering::Relaxed)
    }

    /// Start the monitoring loop.
    ///
    /// Runs indefinitely and should be spawned as (or be) the process's
    /// main task.
    pub async fn run(&self) {
        if !self.enabled {
            info!("GPU lock monitoring is disabled");
            return;
        }

        info!(
            "Starting GPU lock monitor (interval: {:?}, levels: {:?})",
            self.config.monitor_interval, self.config.timeout_levels
        );

        let mut ticker = interval(self.config.monitor_interval);

        loop {
            ticker.tick().await;

            match self.check_once().await {
                Ok(summary) if summary.forced_releases > 0 || summary.soft_timeouts > 0 => {
                    info!(
                        scanned = summary.scanned,
                        warnings = summary.warnings,
                        soft_timeouts = summary.soft_timeouts,
                        forced_releases = summary.forced_releases,
                        "Monitor tick complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("GPU lock monitor tick error: {}", e);
                }
            }
        }
    }

    /// Run a single scan-and-escalate cycle (also used by tests and manual
    /// invocation).
    pub async fn check_once(&self) -> anyhow::Result<MonitorSummary> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut summary = MonitorSummary::default();

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
                summary.scanned += 1;

                if let Err(e) = self.check_lock(&mut conn, &key, &mut summary).await {
                    error!(lock_key = key.as_str(), "Failed to check lock: {}", e);
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(summary)
    }

    /// Classify one lock and apply the action for its state.
    async fn check_lock(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        lock_key: &str,
        summary: &mut MonitorSummary,
    ) -> anyhow::Result<()> {
        let ttl: i64 = conn.ttl(lock_key).await?;
        if ttl == -2 {
            // Released between SCAN and TTL; terminal, nothing to do.
            return Ok(());
        }

        let age = if ttl == -1 {
            warn!(
                lock_key = lock_key,
                "Zombie lock: no TTL set, treating as expired-by-age"
            );
            LockAge::NoTtl
        } else {
            LockAge::Known(
                self.lock_config
                    .lock_timeout
                    .as_secs()
                    .saturating_sub(ttl as u64),
            )
        };

        let heartbeat_age = self.heartbeat_age(conn, lock_key).await?;
        let holder: Option<String> = conn.get(lock_key).await?;

        let state = classify(
            age,
            heartbeat_age,
            &self.config.timeout_levels,
            self.lock_config.heartbeat_timeout,
        );

        match state {
            LockState::Healthy => {}
            LockState::Warning => {
                summary.warnings += 1;
                warn!(
                    lock_key = lock_key,
                    holder = ?holder,
                    age = ?age,
                    "Lock held past warning threshold"
                );
            }
            LockState::SoftTimeout => {
                summary.soft_timeouts += 1;
                warn!(
                    lock_key = lock_key,
                    holder = ?holder,
                    age = ?age,
                    last_heartbeat_age = ?heartbeat_age,
                    "Lock past soft timeout with stale heartbeat, requesting graceful termination"
                );
                // Best-effort: the holder may already be dead.
                if let Err(e) = self
                    .manager
                    .events()
                    .terminate_requested(lock_key, holder)
                    .await
                {
                    warn!(
                        lock_key = lock_key,
                        "Failed to publish terminate request: {}", e
                    );
                }
            }
            LockState::HardTimeout => {
                error!(
                    lock_key = lock_key,
                    holder = ?holder,
                    age = ?age,
                    last_heartbeat_age = ?heartbeat_age,
                    "Lock past hard timeout with stale heartbeat, force-releasing"
                );
                let previous = self.manager.force_release(lock_key, "hard timeout").await?;
                summary.forced_releases += 1;
                self.total_forced.fetch_add(1, Ordering::Relaxed);
                info!(
                    lock_key = lock_key,
                    previous_value = ?previous,
                    "Force-released stuck lock"
                );
            }
        }

        Ok(())
    }

    /// Age of the lock's heartbeat, or `None` if no heartbeat key exists.
    async fn heartbeat_age(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        lock_key: &str,
    ) -> anyhow::Result<Option<Duration>> {
        let timestamp: Option<i64> = conn.get(heartbeat_key(lock_key)).await?;

        Ok(timestamp.map(|ts| {
            let age = (chrono::Utc::now().timestamp() - ts).max(0);
            Duration::from_secs(age as u64)
        }))
    }
}
