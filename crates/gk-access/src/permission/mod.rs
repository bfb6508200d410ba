pub mod entity;
pub mod repository;
pub mod service;

pub use entity::Permission;
pub use repository::{CachedPermissionRepository, PermissionRepository};
pub use service::{CreatePermissionCommand, PermissionService};
