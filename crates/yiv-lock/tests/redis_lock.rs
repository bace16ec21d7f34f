//! GPU lock integration tests.
//!
//! These exercise the mutual-exclusion and atomic-release properties
//! against a real Redis instance (REDIS_URL, default localhost:6379).

use std::time::Duration;

use yiv_lock::{GpuLockConfig, GpuLockManager, ReleaseOutcome};

fn test_config() -> GpuLockConfig {
    dotenvy::dotenv().ok();
    GpuLockConfig {
        redis_url: std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        poll_interval: Duration::from_millis(100),
        max_wait_time: Duration::from_secs(1),
        lock_timeout: Duration::from_secs(30),
        heartbeat_interval: Duration::from_secs(1),
        ..Default::default()
    }
}

fn test_manager() -> GpuLockManager {
    let config = test_config();
    let client = redis::Client::open(config.redis_url.as_str()).expect("Failed to open client");
    GpuLockManager::new(client, config)
}

fn unique_key() -> String {
    format!("gpu_lock:test_{}", uuid::Uuid::new_v4().simple())
}

/// Test that a held lock cannot be acquired a second time.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_no_double_acquisition() {
    let manager = test_manager();
    let lock_key = unique_key();

    let lease = manager
        .acquire("taskA", &lock_key)
        .await
        .expect("acquire failed")
        .expect("taskA should acquire a free lock");

    // Second acquirer polls until max_wait_time and gives up.
    let second = manager.acquire("taskB", &lock_key).await.expect("acquire failed");
    assert!(second.is_none(), "taskB must not acquire a held lock");

    let stats = manager.statistics();
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.timeouts, 1);

    // After release the lock is free again.
    let outcome = manager.finish(lease, "test done", None).await;
    assert_eq!(outcome, ReleaseOutcome::Released);

    let lease_b = manager
        .acquire("taskB", &lock_key)
        .await
        .expect("acquire failed")
        .expect("taskB should acquire after release");
    manager.finish(lease_b, "test done", None).await;
}

/// Test that only the owner's release deletes the lock.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_release_is_owner_verified() {
    let manager = test_manager();
    let lock_key = unique_key();

    let lease = manager
        .acquire("owner", &lock_key)
        .await
        .expect("acquire failed")
        .expect("owner should acquire");

    // Concurrent non-owner releases all fail; exactly the owner's succeeds.
    let mut handles = Vec::new();
    for i in 0..5 {
        let manager = test_manager();
        let lock_key = lock_key.clone();
        handles.push(tokio::spawn(async move {
            manager
                .release(&format!("intruder{}", i), &lock_key, "non-owner attempt")
                .await
        }));
    }

    let mut non_owner_successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            non_owner_successes += 1;
        }
    }
    assert_eq!(non_owner_successes, 0, "no non-owner release may succeed");

    assert!(manager.release("owner", &lock_key, "owner release").await);

    // Heartbeat task is still attached to the lease; shut it down cleanly.
    let outcome = manager.finish(lease, "already released", None).await;
    assert_eq!(outcome, ReleaseOutcome::NotOwner);
}

/// Test that releasing twice returns false the second time, never raises.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_idempotent_release() {
    let manager = test_manager();
    let lock_key = unique_key();

    let lease = manager
        .acquire("taskA", &lock_key)
        .await
        .expect("acquire failed")
        .expect("should acquire");
    let outcome = manager.finish(lease, "first release", None).await;
    assert_eq!(outcome, ReleaseOutcome::Released);

    assert!(!manager.release("taskA", &lock_key, "second release").await);

    let stats = manager.exception_statistics();
    assert_eq!(stats.ownership_violations, 1);
}

/// Test force release returns the prior holder for audit logging.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_force_release_returns_previous_holder() {
    let manager = test_manager();
    let lock_key = unique_key();

    let lease = manager
        .acquire("taskA", &lock_key)
        .await
        .expect("acquire failed")
        .expect("should acquire");

    let previous = manager
        .force_release(&lock_key, "test")
        .await
        .expect("force release failed");
    assert_eq!(previous.as_deref(), Some("locked_by_taskA"));

    // Absent key: force release is a no-op returning None.
    let previous = manager
        .force_release(&lock_key, "test")
        .await
        .expect("force release failed");
    assert!(previous.is_none());

    let outcome = manager.finish(lease, "already force-released", None).await;
    assert_eq!(outcome, ReleaseOutcome::NotOwner);
}

/// Test the store reclaims the lock at `lock_timeout` when every software
/// release path is skipped (holder killed before cleanup).
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_ttl_expiry_is_the_release_backstop() {
    use redis::AsyncCommands;

    let mut config = test_config();
    config.lock_timeout = Duration::from_secs(2);
    let client = redis::Client::open(config.redis_url.as_str()).unwrap();
    let manager = GpuLockManager::new(client.clone(), config);
    let lock_key = unique_key();

    let lease = manager
        .acquire("taskA", &lock_key)
        .await
        .expect("acquire failed")
        .expect("should acquire");

    // Holder dies without running any release path.
    drop(lease);

    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let value: Option<String> = conn.get(&lock_key).await.unwrap();
    assert!(value.is_none(), "store must reclaim the lock at lock_timeout");

    let lease_b = manager
        .acquire("taskB", &lock_key)
        .await
        .expect("acquire failed")
        .expect("lock must be re-acquirable after TTL expiry");
    manager.finish(lease_b, "test done", None).await;
}

/// Test the heartbeat key appears while held and the task exits once the
/// lock key vanishes.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_heartbeat_lifecycle() {
    use redis::AsyncCommands;
    use yiv_lock::{heartbeat_key, spawn_heartbeat};

    let config = test_config();
    let client = redis::Client::open(config.redis_url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();

    let lock_key = unique_key();
    conn.set_ex::<_, _, ()>(&lock_key, "locked_by_hb_test", 30)
        .await
        .unwrap();

    let handle = spawn_heartbeat(client.clone(), lock_key.clone(), Duration::from_millis(200));

    tokio::time::sleep(Duration::from_millis(500)).await;
    let hb: Option<i64> = conn.get(heartbeat_key(&lock_key)).await.unwrap();
    assert!(hb.is_some(), "heartbeat key should exist while lock is held");

    // Delete the lock: the heartbeat task must notice and exit on its own.
    conn.del::<_, ()>(&lock_key).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(handle.is_finished(), "heartbeat should stop when lock vanishes");
    handle.stop().await;
}

/// Test the cleanup path runs the hook and releases normally.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_finish_runs_cleanup_hook() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let manager = test_manager();
    let lock_key = unique_key();

    let lease = manager
        .acquire("taskA", &lock_key)
        .await
        .expect("acquire failed")
        .expect("should acquire");

    let cleaned = Arc::new(AtomicBool::new(false));
    let cleaned_clone = Arc::clone(&cleaned);
    let outcome = manager
        .finish(
            lease,
            "normal completion",
            Some(Box::new(move || {
                cleaned_clone.store(true, Ordering::SeqCst);
                Ok(())
            })),
        )
        .await;

    assert_eq!(outcome, ReleaseOutcome::Released);
    assert!(cleaned.load(Ordering::SeqCst), "cleanup hook must run");
}

/// Test a failing cleanup hook does not block the release.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_finish_survives_cleanup_failure() {
    let manager = test_manager();
    let lock_key = unique_key();

    let lease = manager
        .acquire("taskA", &lock_key)
        .await
        .expect("acquire failed")
        .expect("should acquire");

    let outcome = manager
        .finish(
            lease,
            "completion with broken cleanup",
            Some(Box::new(|| anyhow::bail!("GPU memory cleanup failed"))),
        )
        .await;

    assert_eq!(outcome, ReleaseOutcome::Released);
}

/// Test the health check reports long-held locks.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_health_check_reports_long_held() {
    use redis::AsyncCommands;

    let mut config = test_config();
    config.lock_timeout = Duration::from_secs(1000);
    config.long_held_threshold = Duration::from_secs(900);
    let client = redis::Client::open(config.redis_url.as_str()).unwrap();
    let manager = GpuLockManager::new(client.clone(), config);

    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let lock_key = unique_key();
    // Remaining TTL 50 of 1000 => age 950, past the 900s threshold.
    conn.set_ex::<_, _, ()>(&lock_key, "locked_by_old_task", 50)
        .await
        .unwrap();

    let report = manager.health_check().await.expect("health check failed");
    assert_eq!(report.status, "healthy");
    assert!(report
        .long_held_locks
        .iter()
        .any(|l| l.lock_key == lock_key && l.held_secs >= 900));

    conn.del::<_, ()>(&lock_key).await.unwrap();
}
