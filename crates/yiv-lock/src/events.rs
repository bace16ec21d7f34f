//! Lock lifecycle events via Redis Pub/Sub.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LockResult;

/// Channel all lock events are published to.
pub const EVENTS_CHANNEL: &str = "gpu_lock:events";

/// Lock lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockEvent {
    /// A task acquired a lock.
    Acquired {
        lock_key: String,
        task_name: String,
        timestamp: DateTime<Utc>,
    },
    /// A task released its lock through the normal path.
    Released {
        lock_key: String,
        task_name: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A task's own exception path deleted the lock unconditionally.
    EmergencyReleased {
        lock_key: String,
        task_name: String,
        previous_holder: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The monitor force-released a timed-out lock.
    ForceReleased {
        lock_key: String,
        previous_holder: Option<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// The monitor is asking a soft-timed-out holder to wind down.
    TerminateRequested {
        lock_key: String,
        holder: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl LockEvent {
    /// Lock key this event refers to.
    pub fn lock_key(&self) -> &str {
        match self {
            LockEvent::Acquired { lock_key, .. }
            | LockEvent::Released { lock_key, .. }
            | LockEvent::EmergencyReleased { lock_key, .. }
            | LockEvent::ForceReleased { lock_key, .. }
            | LockEvent::TerminateRequested { lock_key, .. } => lock_key,
        }
    }
}

/// Channel for publishing/subscribing to lock events.
///
/// Publishing is best-effort: waiters and metrics observers benefit from
/// events, but lock correctness never depends on them.
pub struct LockEventChannel {
    client: redis::Client,
}

impl LockEventChannel {
    /// Create a new event channel.
    pub fn new(redis_url: &str) -> LockResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create a channel sharing an existing client.
    pub fn with_client(client: redis::Client) -> Self {
        Self { client }
    }

    /// Publish an event.
    pub async fn publish(&self, event: &LockEvent) -> LockResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;

        debug!(lock_key = event.lock_key(), "Publishing lock event");
        conn.publish::<_, _, ()>(EVENTS_CHANNEL, payload).await?;

        Ok(())
    }

    /// Publish an acquired event.
    pub async fn acquired(&self, lock_key: &str, task_name: &str) -> LockResult<()> {
        self.publish(&LockEvent::Acquired {
            lock_key: lock_key.to_string(),
            task_name: task_name.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    /// Publish a released event.
    pub async fn released(
        &self,
        lock_key: &str,
        task_name: &str,
        reason: &str,
    ) -> LockResult<()> {
        self.publish(&LockEvent::Released {
            lock_key: lock_key.to_string(),
            task_name: task_name.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    /// Publish an emergency-released event.
    pub async fn emergency_released(
        &self,
        lock_key: &str,
        task_name: &str,
        previous_holder: Option<String>,
    ) -> LockResult<()> {
        self.publish(&LockEvent::EmergencyReleased {
            lock_key: lock_key.to_string(),
            task_name: task_name.to_string(),
            previous_holder,
            timestamp: Utc::now(),
        })
        .await
    }

    /// Publish a force-released event.
    pub async fn force_released(
        &self,
        lock_key: &str,
        previous_holder: Option<String>,
        reason: &str,
    ) -> LockResult<()> {
        self.publish(&LockEvent::ForceReleased {
            lock_key: lock_key.to_string(),
            previous_holder,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    /// Publish a terminate-requested event.
    pub async fn terminate_requested(
        &self,
        lock_key: &str,
        holder: Option<String>,
    ) -> LockResult<()> {
        self.publish(&LockEvent::TerminateRequested {
            lock_key: lock_key.to_string(),
            holder,
            timestamp: Utc::now(),
        })
        .await
    }

    /// Subscribe to lock events.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
    ) -> LockResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = LockEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(EVENTS_CHANNEL).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
