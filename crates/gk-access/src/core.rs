//! Access core wiring
//!
//! [`AccessCore`] is built once at startup from [`AppConfig`] and owns every
//! repository and service. Callers hold it (or the `Arc`s inside it) and pass
//! it down; nothing in the crate is reachable through global state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use gk_config::{AppConfig, CacheBackend};

use crate::auth::{
    AccessTokenSigner, CachedRefreshTokenRepository, JwtAccessTokenSigner, PasswordService,
    RefreshToken, RefreshTokenRepository, SessionService,
};
use crate::authorization::AuthorizationService;
use crate::cache::{Cache, CacheStore, MemoryCacheStore, NullCacheStore, RedisCacheStore};
use crate::permission::{CachedPermissionRepository, Permission, PermissionRepository, PermissionService};
use crate::principal::{
    CachedPrincipalRepository, Principal, PrincipalAccessService, PrincipalLoader,
    PrincipalRepository, PrincipalService,
};
use crate::role::{CachedRoleRepository, Role, RoleRepository, RoleService};
use crate::shared::error::Result;
use crate::store::{InMemoryDatabase, InMemoryRepository, InMemoryUnitOfWork};
use crate::usecase::{EventDispatcher, UnitOfWork};

pub struct AccessCore {
    pub database: Arc<InMemoryDatabase>,
    pub cache: Cache,
    pub uow: Arc<dyn UnitOfWork>,
    pub principals: Arc<dyn PrincipalRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
    pub loader: Arc<PrincipalLoader>,
    pub passwords: Arc<PasswordService>,
    pub sessions: Arc<SessionService>,
    pub authorization: Arc<AuthorizationService>,
    pub principal_admin: Arc<PrincipalService>,
    pub access: Arc<PrincipalAccessService>,
    pub role_admin: Arc<RoleService>,
    pub permission_admin: Arc<PermissionService>,
}

impl AccessCore {
    pub fn builder(config: &AppConfig) -> AccessCoreBuilder {
        AccessCoreBuilder {
            config: config.clone(),
            database: None,
            cache_store: None,
            dispatcher: None,
            signer: None,
        }
    }
}

/// Collaborators default from config: the cache backend it names, a JWT
/// signer, and a dispatcher with the logging and security-alert handlers.
pub struct AccessCoreBuilder {
    config: AppConfig,
    database: Option<Arc<InMemoryDatabase>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    dispatcher: Option<EventDispatcher>,
    signer: Option<Arc<dyn AccessTokenSigner>>,
}

impl AccessCoreBuilder {
    pub fn with_database(mut self, database: Arc<InMemoryDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn AccessTokenSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    async fn cache_store(&mut self) -> Result<Arc<dyn CacheStore>> {
        if let Some(store) = self.cache_store.take() {
            return Ok(store);
        }
        let store: Arc<dyn CacheStore> = match self.config.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
            CacheBackend::Redis => Arc::new(RedisCacheStore::connect(&self.config.cache.redis_url).await?),
            CacheBackend::Disabled => Arc::new(NullCacheStore),
        };
        info!(backend = ?self.config.cache.backend, "Cache backend selected");
        Ok(store)
    }

    pub async fn build(mut self) -> Result<AccessCore> {
        let cache = Cache::new(self.cache_store().await?, self.config.cache.key_prefix.clone());
        let database = self.database.take().unwrap_or_default();
        let dispatcher = self
            .dispatcher
            .take()
            .unwrap_or_else(|| EventDispatcher::builder().with_defaults().build());
        let signer: Arc<dyn AccessTokenSigner> = match self.signer.take() {
            Some(signer) => signer,
            None => Arc::new(JwtAccessTokenSigner::from_config(&self.config.session)?),
        };

        let config = &self.config;
        let ttl = |secs: u64| Duration::from_secs(secs);

        let uow: Arc<dyn UnitOfWork> = Arc::new(InMemoryUnitOfWork::new(
            database.clone(),
            Arc::new(dispatcher),
            config.persistence.conflict_policy.into(),
        ));

        let principals: Arc<dyn PrincipalRepository> = Arc::new(CachedPrincipalRepository::new(
            Arc::new(InMemoryRepository::<Principal>::new(database.clone())),
            cache.clone(),
            ttl(config.cache.principal_ttl_secs),
        ));
        let roles: Arc<dyn RoleRepository> = Arc::new(CachedRoleRepository::new(
            Arc::new(InMemoryRepository::<Role>::new(database.clone())),
            cache.clone(),
            ttl(config.cache.role_ttl_secs),
        ));
        let permissions: Arc<dyn PermissionRepository> = Arc::new(CachedPermissionRepository::new(
            Arc::new(InMemoryRepository::<Permission>::new(database.clone())),
            cache.clone(),
            ttl(config.cache.permission_ttl_secs),
        ));
        let refresh_tokens: Arc<dyn RefreshTokenRepository> = Arc::new(CachedRefreshTokenRepository::new(
            Arc::new(InMemoryRepository::<RefreshToken>::new(database.clone())),
            cache.clone(),
            ttl(config.cache.refresh_token_ttl_secs),
        ));

        let loader = Arc::new(PrincipalLoader::new(
            principals.clone(),
            roles.clone(),
            permissions.clone(),
        ));
        let passwords = Arc::new(PasswordService::from_config(&config.password)?);
        let sessions = Arc::new(SessionService::new(
            loader.clone(),
            refresh_tokens.clone(),
            uow.clone(),
            passwords.clone(),
            signer,
            &config.session,
        )?);

        info!(
            conflict_policy = ?config.persistence.conflict_policy,
            "Access core ready"
        );

        Ok(AccessCore {
            authorization: Arc::new(AuthorizationService::new(loader.clone())),
            principal_admin: Arc::new(PrincipalService::new(
                loader.clone(),
                passwords.clone(),
                sessions.clone(),
                uow.clone(),
            )),
            access: Arc::new(PrincipalAccessService::new(
                loader.clone(),
                roles.clone(),
                permissions.clone(),
                uow.clone(),
            )),
            role_admin: Arc::new(RoleService::new(
                roles.clone(),
                permissions.clone(),
                loader.clone(),
                uow.clone(),
            )),
            permission_admin: Arc::new(PermissionService::new(
                permissions.clone(),
                roles.clone(),
                principals.clone(),
                uow.clone(),
            )),
            database,
            cache,
            uow,
            principals,
            roles,
            permissions,
            refresh_tokens,
            loader,
            passwords,
            sessions,
        })
    }
}
