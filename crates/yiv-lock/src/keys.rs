//! Redis key naming for GPU locks.
//!
//! All key and token formats live here so the manager, the heartbeat task
//! and the monitor process agree on the schema.

/// Prefix shared by every GPU lock key.
pub const LOCK_KEY_PREFIX: &str = "gpu_lock:";

/// Suffix of a heartbeat key relative to its lock key.
pub const HEARTBEAT_SUFFIX: &str = ":heartbeat";

/// Lock key for a physical GPU / logical resource slot.
pub fn gpu_lock_key(gpu_id: u32) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, gpu_id)
}

/// Heartbeat key paired with a lock key.
pub fn heartbeat_key(lock_key: &str) -> String {
    format!("{}{}", lock_key, HEARTBEAT_SUFFIX)
}

/// Ownership token written as the lock value.
///
/// Only used for compare-and-delete equality checks, never for
/// authorization.
pub fn ownership_token(task_name: &str) -> String {
    format!("locked_by_{}", task_name)
}

/// True if `key` is a heartbeat key rather than a lock key.
pub fn is_heartbeat_key(key: &str) -> bool {
    key.ends_with(HEARTBEAT_SUFFIX)
}
