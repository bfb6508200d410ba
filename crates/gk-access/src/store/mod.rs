//! Persistence contract and the in-memory reference store.

pub mod memory;
pub mod repository;

pub use memory::{InMemoryDatabase, InMemoryRepository, InMemoryUnitOfWork};
pub use repository::{Predicate, Repository};
