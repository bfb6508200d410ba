//! Repository contract
//!
//! Reads go straight to the store; writes are staged on the caller's
//! [`ChangeSet`] and only become visible when the unit of work commits.

use async_trait::async_trait;

use crate::shared::entity::Entity;
use crate::shared::error::Result;
use crate::usecase::unit_of_work::ChangeSet;

pub type Predicate<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn get(&self, id: &str, include_deleted: bool) -> Result<Option<T>>;

    async fn list(&self, predicate: Predicate<'_, T>, include_deleted: bool) -> Result<Vec<T>>;

    /// Never served from a cache.
    async fn exists(&self, id: &str) -> Result<bool>;

    async fn insert(&self, entity: &T, changes: &mut ChangeSet) -> Result<()>;

    async fn update(&self, entity: &T, changes: &mut ChangeSet) -> Result<()>;

    /// Soft delete: the row stays readable with `include_deleted`.
    async fn delete(&self, entity: &T, changes: &mut ChangeSet) -> Result<()>;

    async fn hard_delete(&self, entity: &T, changes: &mut ChangeSet) -> Result<()>;

    /// Read the source of truth for a read-modify-write.
    ///
    /// Goes through the `include_deleted` path, which caching decorators
    /// never serve, and filters soft-deleted rows afterwards.
    async fn get_for_update(&self, id: &str) -> Result<Option<T>> {
        Ok(self.get(id, true).await?.filter(|e| !e.is_deleted()))
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<T>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.get(id, false).await? {
                found.push(entity);
            }
        }
        Ok(found)
    }
}
