//! Permission resolution and authorization checks.

pub mod resolver;
pub mod service;

pub use resolver::{get_all_permissions, get_all_roles, has_permission};
pub use service::AuthorizationService;
