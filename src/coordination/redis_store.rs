use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use tokio::time::timeout;

use super::{ttl_millis, CoordinationStore};
use crate::error::CoreError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Compare-and-delete so a worker never releases a lock another worker now owns
const RELEASE_IF_OWNER: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed coordination store
///
/// `ConnectionManager` reconnects transparently and is cheap to clone, so every
/// operation works on its own clone and the store can be shared behind `&self`.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    release_script: Script,
}

impl RedisStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self, CoreError> {
        let client = Client::open(redis_url)?;

        let conn = timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CoreError::Store(format!(
                    "Redis connection timeout after {}s",
                    CONNECT_TIMEOUT.as_secs()
                ))
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            release_script: Script::new(RELEASE_IF_OWNER),
        })
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CoreError> {
        let mut conn = self.conn.clone();

        // SET key value NX PX ttl -> "OK" when set, nil when the key exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.pset_ex(key, value, ttl_millis(ttl)).await?;
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}
