//! In-process cache store on a concurrent hash map.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::store::CacheStore;
use crate::shared::error::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Expired entries are dropped lazily on read and by [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.expires_at > Instant::now())
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        // Guard released above; evict the expired entry
        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = MemoryCacheStore::new();
        store.set("a", "1".into(), Duration::from_secs(10)).await.unwrap();
        store.set("b", "2".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("a").await.unwrap().is_none());
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert_eq!(store.len(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryCacheStore::new();
        store.set("a", "1".into(), Duration::from_secs(10)).await.unwrap();
        store.remove("a").await.unwrap();
        store.remove("missing").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }
}
