//! Development Data Seeder
//!
//! Seeds a small policy model so the dev binary has something to log in as.
//! Every step checks for existing rows first, so seeding twice is a no-op.
//!
//! Default credentials:
//!   Administrator: admin@gatekeeper.local / DevPassword123!
//!   Manager:       alice@acme.com / DevPassword123!
//!   Clerk:         bob@acme.com / DevPassword123!

use std::collections::HashMap;

use tracing::info;

use crate::core::AccessCore;
use crate::permission::{CreatePermissionCommand, Permission, PermissionRepository};
use crate::principal::{Principal, PrincipalRepository, RegisterPrincipalCommand};
use crate::role::{CreateRoleCommand, Role, RoleRepository, RoleType};
use crate::shared::entity::Entity;
use crate::shared::error::Result;
use crate::usecase::ExecutionContext;

pub const DEV_PASSWORD: &str = "DevPassword123!";

const PERMISSIONS: &[(&str, &str, &str)] = &[
    ("Order", "Read", "View orders"),
    ("Order", "Create", "Place orders"),
    ("Order", "Approve", "Approve pending orders"),
    ("Report", "Export", "Export reports"),
    ("Principal", "Manage", "Administer principals and their access"),
];

const ROLES: &[(&str, RoleType, &[&str])] = &[
    ("Administrator", RoleType::System, &["Principal.Manage", "Report.Export", "Order.Read"]),
    ("Manager", RoleType::System, &["Order.Read", "Order.Approve"]),
    ("Clerk", RoleType::Custom, &["Order.Read", "Order.Create"]),
];

struct SeedUser {
    email: &'static str,
    username: &'static str,
    first_name: &'static str,
    last_name: &'static str,
    roles: &'static [&'static str],
    grants: &'static [&'static str],
}

const USERS: &[SeedUser] = &[
    SeedUser {
        email: "admin@gatekeeper.local",
        username: "admin",
        first_name: "Ada",
        last_name: "Admin",
        roles: &["Administrator"],
        grants: &[],
    },
    SeedUser {
        email: "alice@acme.com",
        username: "alice",
        first_name: "Alice",
        last_name: "Manager",
        roles: &["Manager"],
        grants: &["Report.Export"],
    },
    SeedUser {
        email: "bob@acme.com",
        username: "bob",
        first_name: "Bob",
        last_name: "Clerk",
        roles: &["Clerk"],
        grants: &[],
    },
];

/// Development data seeder
pub struct DevSeeder<'a> {
    core: &'a AccessCore,
    ctx: ExecutionContext,
}

impl<'a> DevSeeder<'a> {
    pub fn new(core: &'a AccessCore) -> Self {
        Self {
            core,
            ctx: ExecutionContext::system(),
        }
    }

    /// Seed all development data
    pub async fn seed(&self) -> Result<()> {
        info!("=== DEV DATA SEEDER ===");
        info!("Seeding development data...");

        let permissions = self.seed_permissions().await?;
        let roles = self.seed_roles(&permissions).await?;
        self.seed_users(&roles, &permissions).await?;

        info!("Development data seeded successfully!");
        info!("");
        info!("Default logins:");
        for user in USERS {
            info!("  {:<24} / {}", user.email, DEV_PASSWORD);
        }
        info!("=======================");

        Ok(())
    }

    async fn seed_permissions(&self) -> Result<HashMap<String, Permission>> {
        let mut seeded = HashMap::new();
        for (resource, action, description) in PERMISSIONS {
            let name = format!("{}.{}", resource, action);
            let permission = match self.core.permissions.find_by_name(&name).await? {
                Some(existing) => existing,
                None => {
                    let mut command = CreatePermissionCommand::new(*resource, *action);
                    command.description = Some(description.to_string());
                    let created = self.core.permission_admin.create(command, &self.ctx).await?;
                    info!("Created permission: {}", name);
                    created
                }
            };
            seeded.insert(name, permission);
        }
        Ok(seeded)
    }

    async fn seed_roles(&self, permissions: &HashMap<String, Permission>) -> Result<HashMap<String, Role>> {
        let mut seeded = HashMap::new();
        for (name, role_type, granted) in ROLES {
            let role = match self.core.roles.find_by_name(name).await? {
                Some(existing) => existing,
                None => {
                    let command = CreateRoleCommand {
                        name: name.to_string(),
                        description: None,
                        role_type: *role_type,
                        permission_ids: ids_of(permissions, granted),
                    };
                    let created = self.core.role_admin.create(command, &self.ctx).await?;
                    info!("Created role: {} ({} permissions)", name, granted.len());
                    created
                }
            };
            seeded.insert(name.to_string(), role);
        }
        Ok(seeded)
    }

    async fn seed_users(
        &self,
        roles: &HashMap<String, Role>,
        permissions: &HashMap<String, Permission>,
    ) -> Result<()> {
        for user in USERS {
            if self.core.principals.exists_by_email(user.email).await? {
                continue;
            }
            let principal = self.register(user).await?;
            let role_ids: Vec<String> = user
                .roles
                .iter()
                .filter_map(|name| roles.get(*name))
                .map(|role| role.id().to_string())
                .collect();
            self.core
                .access
                .set_roles(principal.id(), &role_ids, &self.ctx)
                .await?;
            self.core
                .access
                .set_permissions(principal.id(), &ids_of(permissions, user.grants), &self.ctx)
                .await?;
            info!("Created user: {} ({})", user.email, user.roles.join(", "));
        }
        Ok(())
    }

    async fn register(&self, user: &SeedUser) -> Result<Principal> {
        let command = RegisterPrincipalCommand {
            email: user.email.to_string(),
            username: user.username.to_string(),
            password: DEV_PASSWORD.to_string(),
            first_name: user.first_name.to_string(),
            last_name: user.last_name.to_string(),
        };
        let mut principal = self.core.principal_admin.register(command, &self.ctx).await?;
        principal = self.core.principal_admin.confirm_email(principal.id(), &self.ctx).await?;
        Ok(principal)
    }
}

fn ids_of(permissions: &HashMap<String, Permission>, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter_map(|name| permissions.get(*name))
        .map(|permission| permission.id().to_string())
        .collect()
}
