//! Principal Repository

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::entity::Principal;
use crate::cache::cached_repository::{delegate_repository, CachedRepository};
use crate::cache::keys;
use crate::cache::Cache;
use crate::shared::association::is_assigned;
use crate::shared::entity::{eq_ignore_case, normalize_key};
use crate::shared::error::Result;
use crate::store::memory::InMemoryRepository;
use crate::store::repository::Repository;

#[async_trait]
pub trait PrincipalRepository: Repository<Principal> {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>>;

    /// Case-insensitive.
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>>;

    async fn exists_by_email(&self, email: &str) -> Result<bool>;

    async fn exists_by_username(&self, username: &str) -> Result<bool>;

    /// Principals with an active assignment of the role.
    async fn find_holding_role(&self, role_id: &str) -> Result<Vec<Principal>>;

    /// Principals with an active direct grant of the permission.
    async fn find_with_permission(&self, permission_id: &str) -> Result<Vec<Principal>>;
}

#[async_trait]
impl PrincipalRepository for InMemoryRepository<Principal> {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let email = normalize_key(email);
        let found = self.list(&|p: &Principal| p.email() == email, false).await?;
        Ok(found.into_iter().next())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        let username = username.trim();
        let found = self
            .list(&|p: &Principal| eq_ignore_case(p.username(), username), false)
            .await?;
        Ok(found.into_iter().next())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool> {
        Ok(self.find_by_username(username).await?.is_some())
    }

    async fn find_holding_role(&self, role_id: &str) -> Result<Vec<Principal>> {
        self.list(&|p: &Principal| is_assigned(p.all_role_links(), role_id), false)
            .await
    }

    async fn find_with_permission(&self, permission_id: &str) -> Result<Vec<Principal>> {
        self.list(
            &|p: &Principal| is_assigned(p.all_permission_grants(), permission_id),
            false,
        )
        .await
    }
}

/// Caches id, email and username lookups. `exists_*` checks always hit the
/// store so a stale entry can never let a duplicate registration through.
pub struct CachedPrincipalRepository {
    base: CachedRepository<Principal, dyn PrincipalRepository>,
}

impl CachedPrincipalRepository {
    pub fn new(inner: Arc<dyn PrincipalRepository>, cache: Cache, ttl: Duration) -> Self {
        Self {
            base: CachedRepository::new(inner, cache, ttl),
        }
    }
}

delegate_repository!(CachedPrincipalRepository, Principal);

#[async_trait]
impl PrincipalRepository for CachedPrincipalRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let inner = self.base.inner();
        self.base
            .get_by_key(&keys::principal_by_email(email), || inner.find_by_email(email))
            .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        let inner = self.base.inner();
        self.base
            .get_by_key(&keys::principal_by_username(username), || {
                inner.find_by_username(username)
            })
            .await
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        self.base.inner().exists_by_email(email).await
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool> {
        self.base.inner().exists_by_username(username).await
    }

    async fn find_holding_role(&self, role_id: &str) -> Result<Vec<Principal>> {
        self.base.inner().find_holding_role(role_id).await
    }

    async fn find_with_permission(&self, permission_id: &str) -> Result<Vec<Principal>> {
        self.base.inner().find_with_permission(permission_id).await
    }
}
