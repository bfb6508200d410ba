pub mod entity;
pub mod repository;
pub mod service;

pub use entity::{Role, RolePermission, RoleType};
pub use repository::{CachedRoleRepository, RoleRepository};
pub use service::{CreateRoleCommand, RoleService, UpdateRoleCommand};
