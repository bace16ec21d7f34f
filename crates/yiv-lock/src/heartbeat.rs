//! Heartbeat updater for held locks.
//!
//! Proves liveness of the process holding a lock, independent of the lock's
//! own TTL. The monitor uses heartbeat freshness to tell "slow but alive"
//! from "dead".

use std::time::Duration;

use redis::AsyncCommands;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::keys::heartbeat_key;

/// Handle to a running heartbeat task.
///
/// The cleanup path must call [`HeartbeatHandle::stop`] before releasing the
/// lock so no heartbeat writer outlives it.
#[derive(Debug)]
pub struct HeartbeatHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the heartbeat task and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown.send(true).ok();
        self.task.await.ok();
    }

    /// True if the heartbeat task has already exited on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a background task refreshing `<lock_key>:heartbeat` every
/// `interval`, with TTL `2 × interval` so a single missed beat does not
/// immediately look dead.
///
/// The task exits on its own if the lock key disappears (released, expired
/// or force-released) rather than keep writing a stale heartbeat.
pub fn spawn_heartbeat(
    client: redis::Client,
    lock_key: String,
    interval: Duration,
) -> HeartbeatHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                res = shutdown_rx.changed() => {
                    // A closed channel means the handle was dropped without
                    // stop(); treat it as a shutdown signal.
                    if res.is_err() || *shutdown_rx.borrow() {
                        debug!(lock_key = lock_key.as_str(), "Heartbeat stopped");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match beat(&client, &lock_key, interval).await {
                        Ok(true) => failures.record_success(),
                        Ok(false) => {
                            debug!(
                                lock_key = lock_key.as_str(),
                                "Lock key gone, heartbeat exiting"
                            );
                            break;
                        }
                        Err(e) => {
                            // Transient store errors never propagate to the
                            // caller's protected work.
                            if failures.record_failure() {
                                warn!(
                                    lock_key = lock_key.as_str(),
                                    "Heartbeat write failed: {}", e
                                );
                            }
                        }
                    }
                }
            }
        }
    });

    HeartbeatHandle { shutdown, task }
}

/// Write one heartbeat. Returns `Ok(false)` if the lock key no longer
/// exists.
async fn beat(
    client: &redis::Client,
    lock_key: &str,
    interval: Duration,
) -> Result<bool, redis::RedisError> {
    let mut conn = client.get_multiplexed_async_connection().await?;

    let exists: bool = conn.exists(lock_key).await?;
    if !exists {
        return Ok(false);
    }

    let now = chrono::Utc::now().timestamp();
    conn.set_ex::<_, _, ()>(heartbeat_key(lock_key), now, interval.as_secs() * 2)
        .await?;

    Ok(true)
}

/// Tracks consecutive failures of a repeating operation and suppresses log
/// spam once the operation keeps failing.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    /// Current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(3);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());

        // 4th failure triggers suppression (returns false)
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn test_stop_joins_the_task() {
        // A client pointed at a closed port: every beat errors, which the
        // task swallows; stop() must still terminate it promptly.
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        let handle = spawn_heartbeat(
            client,
            "gpu_lock:test".to_string(),
            Duration::from_secs(60),
        );

        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("heartbeat task did not stop");
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_the_task() {
        // A lease dropped without finish() (e.g. during a panic unwind)
        // closes the shutdown channel; the task must exit, not spin on the
        // closed channel.
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        let HeartbeatHandle { shutdown, task } = spawn_heartbeat(
            client,
            "gpu_lock:test".to_string(),
            Duration::from_secs(60),
        );

        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("heartbeat task did not exit after its handle was dropped")
            .ok();
    }
}
