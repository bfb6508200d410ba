//! Refresh Token Repository

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::refresh_token::RefreshToken;
use crate::cache::cached_repository::{delegate_repository, CachedRepository};
use crate::cache::keys;
use crate::cache::Cache;
use crate::shared::error::Result;
use crate::store::memory::InMemoryRepository;
use crate::store::repository::Repository;

#[async_trait]
pub trait RefreshTokenRepository: Repository<RefreshToken> {
    /// Non-revoked, non-expired token with this hash.
    async fn find_active_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Any token with this hash, revoked or expired included.
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    async fn find_active_by_principal(&self, principal_id: &str) -> Result<Vec<RefreshToken>>;

    /// Tokens that expired or were revoked before `cutoff`.
    async fn find_purgeable(&self, cutoff: DateTime<Utc>) -> Result<Vec<RefreshToken>>;
}

#[async_trait]
impl RefreshTokenRepository for InMemoryRepository<RefreshToken> {
    async fn find_active_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let now = Utc::now();
        let found = self
            .list(&|t: &RefreshToken| t.token_hash == token_hash && t.is_active_at(now), false)
            .await?;
        Ok(found.into_iter().next())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let found = self
            .list(&|t: &RefreshToken| t.token_hash == token_hash, false)
            .await?;
        Ok(found.into_iter().next())
    }

    async fn find_active_by_principal(&self, principal_id: &str) -> Result<Vec<RefreshToken>> {
        let now = Utc::now();
        self.list(
            &|t: &RefreshToken| t.principal_id == principal_id && t.is_active_at(now),
            false,
        )
        .await
    }

    async fn find_purgeable(&self, cutoff: DateTime<Utc>) -> Result<Vec<RefreshToken>> {
        self.list(
            &|t: &RefreshToken| {
                t.expires_at < cutoff || t.revoked_at.is_some_and(|at| at < cutoff)
            },
            true,
        )
        .await
    }
}

/// Caches active-token lookups by hash with a short TTL.
///
/// A cached row is re-checked for expiry on every hit, and revocation
/// invalidates the hash key after commit. Lookups that must see revoked rows
/// always go to the store.
pub struct CachedRefreshTokenRepository {
    base: CachedRepository<RefreshToken, dyn RefreshTokenRepository>,
}

impl CachedRefreshTokenRepository {
    pub fn new(inner: Arc<dyn RefreshTokenRepository>, cache: Cache, ttl: Duration) -> Self {
        Self {
            base: CachedRepository::new(inner, cache, ttl),
        }
    }
}

delegate_repository!(CachedRefreshTokenRepository, RefreshToken);

#[async_trait]
impl RefreshTokenRepository for CachedRefreshTokenRepository {
    async fn find_active_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let inner = self.base.inner();
        let found = self
            .base
            .get_by_key(&keys::refresh_token_by_hash(token_hash), || {
                inner.find_active_by_hash(token_hash)
            })
            .await?;
        Ok(found.filter(RefreshToken::is_active))
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        self.base.inner().find_by_hash(token_hash).await
    }

    async fn find_active_by_principal(&self, principal_id: &str) -> Result<Vec<RefreshToken>> {
        self.base.inner().find_active_by_principal(principal_id).await
    }

    async fn find_purgeable(&self, cutoff: DateTime<Utc>) -> Result<Vec<RefreshToken>> {
        self.base.inner().find_purgeable(cutoff).await
    }
}
