//! Atomic Lua scripts for lock release.
//!
//! Both release paths must run server-side as a single script. A client-side
//! GET followed by DEL has a race: another process can acquire the lock
//! between the two commands, and the DEL then destroys the new holder's lock.

use redis::aio::MultiplexedConnection;
use redis::Script;

use crate::error::{LockError, LockResult};

/// Conditional compare-and-delete release.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Unconditional delete returning the prior holder for audit logging.
const FORCE_RELEASE_SCRIPT: &str = r#"
local previous = redis.call('GET', KEYS[1])
if previous then
    redis.call('DEL', KEYS[1])
end
return previous
"#;

/// Server-side lock release scripts.
pub struct LockScripts {
    release: Script,
    force_release: Script,
}

impl Default for LockScripts {
    fn default() -> Self {
        Self::new()
    }
}

impl LockScripts {
    pub fn new() -> Self {
        Self {
            release: Script::new(RELEASE_SCRIPT),
            force_release: Script::new(FORCE_RELEASE_SCRIPT),
        }
    }

    /// Delete `lock_key` iff its value equals `expected_token`.
    ///
    /// Returns `true` on delete, `false` on mismatch or absence.
    pub async fn release(
        &self,
        conn: &mut MultiplexedConnection,
        lock_key: &str,
        expected_token: &str,
    ) -> LockResult<bool> {
        let deleted: i32 = self
            .release
            .key(lock_key)
            .arg(expected_token)
            .invoke_async(conn)
            .await
            .map_err(|e| LockError::script_failed(format!("release script: {}", e)))?;
        Ok(deleted == 1)
    }

    /// Delete `lock_key` unconditionally, returning the prior value.
    ///
    /// Returns `None` if the key was already absent.
    pub async fn force_release(
        &self,
        conn: &mut MultiplexedConnection,
        lock_key: &str,
    ) -> LockResult<Option<String>> {
        let previous: Option<String> = self
            .force_release
            .key(lock_key)
            .invoke_async(conn)
            .await
            .map_err(|e| LockError::script_failed(format!("force-release script: {}", e)))?;
        Ok(previous)
    }
}
