use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::{ttl_millis, CoordinationStore};
use crate::error::CoreError;

/// Process-local coordination store with lazy expiry
///
/// Behaves like the Redis store for a single process (tests, dry runs). Cloning
/// shares the underlying map.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, CoreError> {
        self.entries
            .lock()
            .map_err(|e| CoreError::Store(format!("in-memory store poisoned: {}", e)))
    }

    /// Number of live (unexpired) keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| entries.values().filter(|(_, exp)| *exp > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop every expired entry; keys that are never read again would otherwise pile up
fn sweep(entries: &mut HashMap<String, (String, Instant)>, now: Instant) {
    entries.retain(|_, (_, expires_at)| *expires_at > now);
}

fn expiry(ttl: Duration) -> Instant {
    Instant::now() + Duration::from_millis(ttl_millis(ttl))
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CoreError> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        sweep(&mut entries, now);

        if entries.contains_key(key) {
            return Ok(false);
        }

        entries.insert(key.to_string(), (value.to_string(), expiry(ttl)));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), CoreError> {
        let mut entries = self.lock()?;
        sweep(&mut entries, Instant::now());
        entries.insert(key.to_string(), (value.to_string(), expiry(ttl)));
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CoreError> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        let matches = matches!(
            entries.get(key),
            Some((value, expires_at)) if value == expected && *expires_at > now
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_only_once() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(30);

        assert!(store.set_if_absent("lock:BTC", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:BTC", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock:BTC").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = InMemoryStore::new();
        store
            .setex("cache", Duration::from_secs(5), "value")
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.get("cache").await.unwrap(), Some("value".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("cache").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_do_not_accumulate() {
        let store = InMemoryStore::new();

        for minute in 0..50 {
            let key = format!("analysis:BTCUSDT:1h:{}", minute);
            store.setex(&key, Duration::from_secs(25), "cached").await.unwrap();
            tokio::time::advance(Duration::from_secs(60)).await;
        }
        store
            .set_if_absent("lock:analysis:BTCUSDT", "w", Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(store.entries.lock().unwrap().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_can_be_reacquired() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert!(store.set_if_absent("lock", "crashed-worker", ttl).await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.set_if_absent("lock", "next-worker", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_if_equals_respects_owner() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(30);
        store.set_if_absent("lock", "owner-1", ttl).await.unwrap();

        assert!(!store.delete_if_equals("lock", "owner-2").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_some());

        assert!(store.delete_if_equals("lock", "owner-1").await.unwrap());
        assert!(store.get("lock").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
