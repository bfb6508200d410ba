//! Role Repository

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::entity::Role;
use crate::cache::cached_repository::{delegate_repository, CachedRepository};
use crate::cache::keys;
use crate::cache::Cache;
use crate::shared::error::Result;
use crate::store::memory::InMemoryRepository;
use crate::store::repository::Repository;

#[async_trait]
pub trait RoleRepository: Repository<Role> {
    /// Case-insensitive.
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>>;

    async fn exists_by_name(&self, name: &str) -> Result<bool>;

    /// Roles with an active link to the permission.
    async fn find_granting_permission(&self, permission_id: &str) -> Result<Vec<Role>>;
}

#[async_trait]
impl RoleRepository for InMemoryRepository<Role> {
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        let found = self.list(&|r: &Role| r.matches(name), false).await?;
        Ok(found.into_iter().next())
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool> {
        Ok(self.find_by_name(name).await?.is_some())
    }

    async fn find_granting_permission(&self, permission_id: &str) -> Result<Vec<Role>> {
        self.list(&|r: &Role| r.grants(permission_id), false).await
    }
}

pub struct CachedRoleRepository {
    base: CachedRepository<Role, dyn RoleRepository>,
}

impl CachedRoleRepository {
    pub fn new(inner: Arc<dyn RoleRepository>, cache: Cache, ttl: Duration) -> Self {
        Self {
            base: CachedRepository::new(inner, cache, ttl),
        }
    }
}

delegate_repository!(CachedRoleRepository, Role);

#[async_trait]
impl RoleRepository for CachedRoleRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        let inner = self.base.inner();
        self.base
            .get_by_key(&keys::role_by_name(name), || inner.find_by_name(name))
            .await
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool> {
        self.base.inner().exists_by_name(name).await
    }

    async fn find_granting_permission(&self, permission_id: &str) -> Result<Vec<Role>> {
        self.base.inner().find_granting_permission(permission_id).await
    }
}
