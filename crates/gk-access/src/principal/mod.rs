pub mod access_service;
pub mod entity;
pub mod loader;
pub mod repository;
pub mod service;

pub use access_service::PrincipalAccessService;
pub use entity::{PasswordCredential, Principal, PrincipalPermission, PrincipalRole, PrincipalView};
pub use loader::{Associations, PrincipalLoader};
pub use repository::{CachedPrincipalRepository, PrincipalRepository};
pub use service::{ChangePasswordCommand, PrincipalService, RegisterPrincipalCommand};
