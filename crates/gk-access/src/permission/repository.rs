//! Permission Repository

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::entity::Permission;
use crate::cache::cached_repository::{delegate_repository, CachedRepository};
use crate::cache::keys;
use crate::cache::Cache;
use crate::shared::entity::eq_ignore_case;
use crate::shared::error::Result;
use crate::store::memory::InMemoryRepository;
use crate::store::repository::Repository;

#[async_trait]
pub trait PermissionRepository: Repository<Permission> {
    /// Case-insensitive.
    async fn find_by_name(&self, name: &str) -> Result<Option<Permission>>;

    /// Case-insensitive.
    async fn find_by_resource(&self, resource: &str) -> Result<Vec<Permission>>;

    async fn exists_by_name(&self, name: &str) -> Result<bool>;
}

#[async_trait]
impl PermissionRepository for InMemoryRepository<Permission> {
    async fn find_by_name(&self, name: &str) -> Result<Option<Permission>> {
        let found = self.list(&|p: &Permission| p.matches(name), false).await?;
        Ok(found.into_iter().next())
    }

    async fn find_by_resource(&self, resource: &str) -> Result<Vec<Permission>> {
        let resource = resource.trim();
        self.list(&|p: &Permission| eq_ignore_case(p.resource(), resource), false)
            .await
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool> {
        Ok(self.find_by_name(name).await?.is_some())
    }
}

/// Caches id, name and per-resource list lookups.
pub struct CachedPermissionRepository {
    base: CachedRepository<Permission, dyn PermissionRepository>,
}

impl CachedPermissionRepository {
    pub fn new(inner: Arc<dyn PermissionRepository>, cache: Cache, ttl: Duration) -> Self {
        Self {
            base: CachedRepository::new(inner, cache, ttl),
        }
    }
}

delegate_repository!(CachedPermissionRepository, Permission);

#[async_trait]
impl PermissionRepository for CachedPermissionRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Permission>> {
        let inner = self.base.inner();
        self.base
            .get_by_key(&keys::permission_by_name(name), || inner.find_by_name(name))
            .await
    }

    async fn find_by_resource(&self, resource: &str) -> Result<Vec<Permission>> {
        let inner = self.base.inner();
        self.base
            .list_by_key(&keys::permissions_by_resource(resource), || {
                inner.find_by_resource(resource)
            })
            .await
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool> {
        self.base.inner().exists_by_name(name).await
    }
}
