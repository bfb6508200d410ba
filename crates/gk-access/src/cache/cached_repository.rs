//! Cache-aside repository decorator
//!
//! Wraps any [`Repository`] with read-through caching of id lookups. Writes
//! are staged on the wrapped repository unchanged, and an after-commit hook
//! on the change set removes every key of the entity's previous and new
//! state. Nothing is invalidated if the change set is rolled back or the
//! commit fails.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use std::future::Future;
use tracing::debug;

use super::keys::CachedEntity;
use super::store::Cache;
use crate::shared::error::Result;
use crate::store::repository::{Predicate, Repository};
use crate::usecase::unit_of_work::ChangeSet;

pub struct CachedRepository<T, R: ?Sized> {
    inner: Arc<R>,
    cache: Cache,
    ttl: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T, R> CachedRepository<T, R>
where
    T: CachedEntity,
    R: Repository<T> + ?Sized,
{
    pub fn new(inner: Arc<R>, cache: Cache, ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            ttl,
            _marker: PhantomData,
        }
    }

    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Read-through for a secondary-index lookup of a single entity.
    pub async fn get_by_key<F, Fut>(&self, key: &str, load: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        self.cache.get_or_set(key, self.ttl, load).await
    }

    /// Read-through for a secondary-index lookup returning many entities.
    pub async fn list_by_key<F, Fut>(&self, key: &str, load: F) -> Result<Vec<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let found = self
            .cache
            .get_or_set(key, self.ttl, move || async move { load().await.map(Some) })
            .await?;
        Ok(found.unwrap_or_default())
    }

    /// Collect the keys of the stored and the new state and register their
    /// removal once the change set commits.
    async fn invalidate_after_commit(&self, entity: &T, changes: &mut ChangeSet) -> Result<()> {
        let mut keys = entity.cache_keys();
        if let Some(previous) = self.inner.get(entity.id(), true).await? {
            for key in previous.cache_keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }

        let cache = self.cache.clone();
        changes.after_commit(move || async move {
            debug!(keys = ?keys, "Invalidating cache entries");
            cache.remove_all(&keys).await;
        });
        Ok(())
    }
}

#[async_trait]
impl<T, R> Repository<T> for CachedRepository<T, R>
where
    T: CachedEntity,
    R: Repository<T> + ?Sized,
{
    async fn get(&self, id: &str, include_deleted: bool) -> Result<Option<T>> {
        if include_deleted {
            return self.inner.get(id, true).await;
        }
        self.cache
            .get_or_set(&T::id_key(id), self.ttl, || self.inner.get(id, false))
            .await
    }

    async fn list(&self, predicate: Predicate<'_, T>, include_deleted: bool) -> Result<Vec<T>> {
        self.inner.list(predicate, include_deleted).await
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.inner.exists(id).await
    }

    async fn insert(&self, entity: &T, changes: &mut ChangeSet) -> Result<()> {
        self.inner.insert(entity, changes).await?;
        self.invalidate_after_commit(entity, changes).await
    }

    async fn update(&self, entity: &T, changes: &mut ChangeSet) -> Result<()> {
        self.inner.update(entity, changes).await?;
        self.invalidate_after_commit(entity, changes).await
    }

    async fn delete(&self, entity: &T, changes: &mut ChangeSet) -> Result<()> {
        self.inner.delete(entity, changes).await?;
        self.invalidate_after_commit(entity, changes).await
    }

    async fn hard_delete(&self, entity: &T, changes: &mut ChangeSet) -> Result<()> {
        self.inner.hard_delete(entity, changes).await?;
        self.invalidate_after_commit(entity, changes).await
    }
}

/// Implement [`Repository`] for an entity-specific cached repository by
/// forwarding to its `base: CachedRepository` field.
macro_rules! delegate_repository {
    ($repo:ty, $entity:ty) => {
        #[async_trait::async_trait]
        impl $crate::store::repository::Repository<$entity> for $repo {
            async fn get(
                &self,
                id: &str,
                include_deleted: bool,
            ) -> $crate::shared::error::Result<Option<$entity>> {
                self.base.get(id, include_deleted).await
            }

            async fn list(
                &self,
                predicate: $crate::store::repository::Predicate<'_, $entity>,
                include_deleted: bool,
            ) -> $crate::shared::error::Result<Vec<$entity>> {
                self.base.list(predicate, include_deleted).await
            }

            async fn exists(&self, id: &str) -> $crate::shared::error::Result<bool> {
                self.base.exists(id).await
            }

            async fn insert(
                &self,
                entity: &$entity,
                changes: &mut $crate::usecase::unit_of_work::ChangeSet,
            ) -> $crate::shared::error::Result<()> {
                self.base.insert(entity, changes).await
            }

            async fn update(
                &self,
                entity: &$entity,
                changes: &mut $crate::usecase::unit_of_work::ChangeSet,
            ) -> $crate::shared::error::Result<()> {
                self.base.update(entity, changes).await
            }

            async fn delete(
                &self,
                entity: &$entity,
                changes: &mut $crate::usecase::unit_of_work::ChangeSet,
            ) -> $crate::shared::error::Result<()> {
                self.base.delete(entity, changes).await
            }

            async fn hard_delete(
                &self,
                entity: &$entity,
                changes: &mut $crate::usecase::unit_of_work::ChangeSet,
            ) -> $crate::shared::error::Result<()> {
                self.base.hard_delete(entity, changes).await
            }
        }
    };
}

pub(crate) use delegate_repository;
