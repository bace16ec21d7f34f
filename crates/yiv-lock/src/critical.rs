//! Last-resort persistence for release failures.
//!
//! Used only when both the normal and the emergency release failed. Appends
//! one JSON record per line to a dedicated file and fires a P0 alert hook
//! requiring human intervention.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::error;

use crate::error::LockResult;

/// Alert callback invoked for every recorded critical failure.
pub type AlertHook = Arc<dyn Fn(&CriticalFailureRecord) + Send + Sync>;

/// One critical-failure log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalFailureRecord {
    pub lock_key: String,
    pub task_name: String,
    pub error: String,
    pub traceback: String,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
}

impl CriticalFailureRecord {
    /// Build a record for the current host and time.
    pub fn new(lock_key: &str, task_name: &str, error: impl Into<String>) -> Self {
        Self {
            lock_key: lock_key.to_string(),
            task_name: task_name.to_string(),
            error: error.into(),
            traceback: std::backtrace::Backtrace::force_capture().to_string(),
            timestamp: Utc::now(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// Append-only recorder for critical release failures.
pub struct CriticalFailureRecorder {
    path: PathBuf,
    alert: Option<AlertHook>,
}

impl CriticalFailureRecorder {
    /// Create a recorder writing to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            alert: None,
        }
    }

    /// Attach an alert hook fired after every record.
    pub fn with_alert(mut self, alert: AlertHook) -> Self {
        self.alert = Some(alert);
        self
    }

    /// Path of the failure log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and fire the alert hook.
    pub async fn record(&self, record: &CriticalFailureRecord) -> LockResult<()> {
        error!(
            lock_key = record.lock_key.as_str(),
            task_name = record.task_name.as_str(),
            "CRITICAL: lock could not be released, human intervention required: {}",
            record.error
        );

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        if let Some(alert) = &self.alert {
            alert(record);
        }

        Ok(())
    }
}
