//! Cache contract and the JSON-typed wrapper repositories use.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::shared::error::Result;

/// Shared key/value store with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Store used when caching is disabled: every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCacheStore;

#[async_trait]
impl CacheStore for NullCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Namespaced, JSON-typed view over a [`CacheStore`].
///
/// Store failures never fail the caller: reads fall through to the factory
/// and failed writes or removals are logged and skipped.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullCacheStore), "")
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.full_key(key);
        let raw = match self.store.get(&full_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache read failed, falling through to store");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %full_key, error = %e, "Dropping undecodable cache entry");
                self.remove(key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let full_key = self.full_key(key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache value not serializable, skipping");
                return;
            }
        };
        if let Err(e) = self.store.set(&full_key, raw, ttl).await {
            warn!(key = %full_key, error = %e, "Cache write failed");
        }
    }

    /// Read-through. `None` from the factory is returned but never cached.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(hit) = self.get(key).await {
            debug!(key, "Cache hit");
            return Ok(Some(hit));
        }
        debug!(key, "Cache miss");

        let loaded = factory().await?;
        if let Some(value) = &loaded {
            self.set(key, value, ttl).await;
        }
        Ok(loaded)
    }

    pub async fn remove(&self, key: &str) {
        let full_key = self.full_key(key);
        if let Err(e) = self.store.remove(&full_key).await {
            warn!(key = %full_key, error = %e, "Cache invalidation failed, entry stays until TTL");
        }
    }

    pub async fn remove_all(&self, keys: &[String]) {
        join_all(keys.iter().map(|key| self.remove(key))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::shared::error::AccessError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(AccessError::cache("connection refused"))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            Err(AccessError::cache("connection refused"))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(AccessError::cache("connection refused"))
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_get_or_set_populates_once() {
        let cache = Cache::new(Arc::new(MemoryCacheStore::new()), "test");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Option<String> = cache
                .get_or_set("k", TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("v".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(value.as_deref(), Some("v"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_misses_are_not_cached() {
        let cache = Cache::new(Arc::new(MemoryCacheStore::new()), "test");
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Option<String> = cache
                .get_or_set("absent", TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .unwrap();
            assert!(value.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_broken_store_degrades_to_pass_through() {
        let cache = Cache::new(Arc::new(BrokenStore), "test");
        let value: Option<u32> = cache
            .get_or_set("k", TTL, || async { Ok(Some(7)) })
            .await
            .unwrap();
        assert_eq!(value, Some(7));
        cache.remove_all(&["k".to_string()]).await;
    }

    #[tokio::test]
    async fn test_factory_errors_propagate() {
        let cache = Cache::new(Arc::new(MemoryCacheStore::new()), "test");
        let result: Result<Option<u32>> = cache
            .get_or_set("k", TTL, || async { Err(AccessError::persistence("timeout")) })
            .await;
        assert!(matches!(result, Err(AccessError::Persistence { .. })));
    }

    #[tokio::test]
    async fn test_prefix_is_applied() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = Cache::new(store.clone(), "gk");
        cache.set("role:id:1", &"x", TTL).await;
        assert!(store.get("gk:role:id:1").await.unwrap().is_some());

        cache.remove("role:id:1").await;
        assert!(store.get("gk:role:id:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_dropped() {
        let store = Arc::new(MemoryCacheStore::new());
        store.set("k", "not json".into(), TTL).await.unwrap();
        let cache = Cache::new(store.clone(), "");

        let value: Option<u32> = cache.get("k").await;
        assert!(value.is_none());
        assert!(store.get("k").await.unwrap().is_none());
    }
}
