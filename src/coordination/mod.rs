// Shared key-value coordination used for both locks and caches
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CoreError;

pub use self::memory::InMemoryStore;
pub use self::redis_store::RedisStore;

/// Key-value store with TTLs shared by every worker process
///
/// All coordination between workers goes through these four operations; nothing is
/// shared in memory across processes.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically set `key` only if it does not exist. Returns true when this call set it.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    async fn delete(&self, key: &str) -> Result<(), CoreError>;

    /// Set `key` unconditionally with an expiry
    async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), CoreError>;

    /// Delete `key` only while it still holds `expected`. Returns true if deleted.
    ///
    /// The default is a get-then-delete; implementations with server-side scripting
    /// override it with an atomic compare-and-delete.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CoreError> {
        match self.get(key).await? {
            Some(current) if current == expected => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Redis refuses zero-second expiries; round sub-second TTLs up
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
