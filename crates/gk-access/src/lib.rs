//! Gatekeeper Access Core
//!
//! Access-control core providing:
//! - Identity and policy model (principals, roles, permissions)
//! - Effective permission resolution over direct grants and roles
//! - Refresh-token rotation with reuse detection and family revocation
//! - Cache-aside repositories with after-commit invalidation
//! - Unit of work with optimistic concurrency and audit rows per event
//!
//! ## Module Organization (Aggregate-based)
//!
//! Each aggregate contains:
//! - `entity` - Domain entities
//! - `repository` - Data access, plain and cached
//! - `service` - Operations that stage changes and commit through the unit of work

// Core aggregates
pub mod principal;
pub mod role;
pub mod permission;

// Authentication & authorization
pub mod auth;
pub mod authorization;
pub mod audit;

// Infrastructure
pub mod cache;
pub mod shared;
pub mod store;

// Cross-cutting concerns
pub mod usecase;
pub mod core;
pub mod seed;

pub use shared::error::{AccessError, ErrorKind, Result};
pub use shared::tsid::TsidGenerator;

pub use usecase::{AccessEvent, ConflictPolicy, EventDispatcher, ExecutionContext, UnitOfWork};

pub use principal::{Associations, Principal, PrincipalView};
pub use role::{Role, RoleType};
pub use permission::Permission;
pub use auth::{LoginCommand, LoginResult, RefreshToken, SessionService, SessionTokens};
pub use authorization::AuthorizationService;

pub use self::core::{AccessCore, AccessCoreBuilder};
pub use seed::DevSeeder;
