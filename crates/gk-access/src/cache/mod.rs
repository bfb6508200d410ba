//! Cache-aside layer
//!
//! Application code populates the cache on read misses and invalidates it
//! after writes commit. The cache is never written from a write path, so an
//! uncommitted value can never become visible through it.

pub mod cached_repository;
pub mod keys;
pub mod memory;
pub mod redis;
pub mod store;

pub use cached_repository::CachedRepository;
pub use keys::CachedEntity;
pub use memory::MemoryCacheStore;
pub use self::redis::RedisCacheStore;
pub use store::{Cache, CacheStore, NullCacheStore};
