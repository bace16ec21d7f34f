//! Cleanup path for protected tasks.
//!
//! Every task that holds a GPU lock must end its lease through
//! [`GpuLockManager::finish`], success or failure alike. The shutdown runs
//! three independently-guarded layers so a failure in one layer can never
//! suppress the layers after it, and nothing here re-raises past the task
//! boundary.

use tracing::{info, warn};

use crate::critical::CriticalFailureRecord;
use crate::heartbeat::HeartbeatHandle;
use crate::manager::{GpuLockManager, ReleaseStatus};

/// GPU-resource cleanup hook, e.g. freeing GPU memory.
pub type CleanupHook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// A held GPU lock with its running heartbeat task.
#[derive(Debug)]
pub struct LockLease {
    task_name: String,
    lock_key: String,
    heartbeat: HeartbeatHandle,
}

impl LockLease {
    pub(crate) fn new(task_name: &str, lock_key: &str, heartbeat: HeartbeatHandle) -> Self {
        Self {
            task_name: task_name.to_string(),
            lock_key: lock_key.to_string(),
            heartbeat,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }
}

/// How a lease ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Owner-verified release succeeded.
    Released,
    /// The lock was no longer ours (expired or re-acquired); nothing to do.
    NotOwner,
    /// Normal release failed on an infrastructure error; the unconditional
    /// delete succeeded instead.
    EmergencyReleased,
    /// Both releases failed; the failure was persisted and escalated.
    CriticalFailure,
}

impl GpuLockManager {
    /// End a lease: stop the heartbeat, run the cleanup hook, then release
    /// with emergency fallback.
    ///
    /// Layer 1 (cleanup hook) failures log a warning only. Layer 2 is the
    /// conditional release; an ownership violation ends the chain there,
    /// since the lock is provably not ours and an unconditional delete
    /// could destroy a new holder's lock. Layer 3, the emergency release,
    /// runs only when layer 2 hit an infrastructure failure; if even that
    /// delete fails, the critical-failure recorder takes over.
    pub async fn finish(
        &self,
        lease: LockLease,
        reason: &str,
        cleanup: Option<CleanupHook>,
    ) -> ReleaseOutcome {
        let LockLease {
            task_name,
            lock_key,
            heartbeat,
        } = lease;

        // Stop the heartbeat before touching the lock so no writer outlives
        // the release.
        heartbeat.stop().await;

        // Layer 1: resource cleanup.
        if let Some(cleanup) = cleanup {
            if let Err(e) = cleanup() {
                warn!(
                    lock_key = lock_key.as_str(),
                    task_name = task_name.as_str(),
                    "GPU cleanup hook failed: {}", e
                );
            }
        }

        // Layer 2: normal release.
        let error = match self.try_release(&task_name, &lock_key, reason).await {
            ReleaseStatus::Released => return ReleaseOutcome::Released,
            ReleaseStatus::NotOwner => return ReleaseOutcome::NotOwner,
            ReleaseStatus::Error(e) => e,
        };
        self.stats_handle().record_normal_release_failure();

        // Layer 3: emergency release.
        let emergency_error = match self.emergency_release(&lock_key, &task_name).await {
            Ok(_) => {
                info!(
                    lock_key = lock_key.as_str(),
                    task_name = task_name.as_str(),
                    "Emergency release recovered from failed normal release"
                );
                return ReleaseOutcome::EmergencyReleased;
            }
            Err(e) => e,
        };

        let record = CriticalFailureRecord::new(
            &lock_key,
            &task_name,
            format!(
                "normal release failed ({}); emergency release failed ({})",
                error, emergency_error
            ),
        );
        if let Err(e) = self.critical_recorder().record(&record).await {
            // The recorder already is the last resort; all that is left is
            // the process log.
            warn!(
                lock_key = lock_key.as_str(),
                "Failed to persist critical-failure record: {}", e
            );
        }

        ReleaseOutcome::CriticalFailure
    }
}
