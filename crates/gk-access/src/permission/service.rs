//! Permission administration.

use std::sync::Arc;

use tracing::info;

use super::entity::Permission;
use super::repository::PermissionRepository;
use crate::principal::PrincipalRepository;
use crate::role::RoleRepository;
use crate::shared::entity::Entity;
use crate::shared::error::{AccessError, Result};
use crate::usecase::domain_event::AccessEvent;
use crate::usecase::execution_context::ExecutionContext;
use crate::usecase::unit_of_work::UnitOfWork;

#[derive(Debug, Clone)]
pub struct CreatePermissionCommand {
    pub resource: String,
    pub action: String,
    /// Defaults to `"{resource}.{action}"`
    pub name: Option<String>,
    pub description: Option<String>,
}

impl CreatePermissionCommand {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            name: None,
            description: None,
        }
    }
}

pub struct PermissionService {
    permissions: Arc<dyn PermissionRepository>,
    roles: Arc<dyn RoleRepository>,
    principals: Arc<dyn PrincipalRepository>,
    uow: Arc<dyn UnitOfWork>,
}

impl PermissionService {
    pub fn new(
        permissions: Arc<dyn PermissionRepository>,
        roles: Arc<dyn RoleRepository>,
        principals: Arc<dyn PrincipalRepository>,
        uow: Arc<dyn UnitOfWork>,
    ) -> Self {
        Self {
            permissions,
            roles,
            principals,
            uow,
        }
    }

    pub async fn create(&self, command: CreatePermissionCommand, ctx: &ExecutionContext) -> Result<Permission> {
        let mut permission = Permission::new(&command.resource, &command.action, command.name.as_deref())?;
        if let Some(description) = command.description {
            permission = permission.with_description(description);
        }
        if self.permissions.exists_by_name(permission.name()).await? {
            return Err(AccessError::conflict(
                "PERMISSION_EXISTS",
                format!("Permission '{}' already exists", permission.name()),
            ));
        }

        let mut changes = self.uow.begin(ctx.clone());
        self.permissions.insert(&permission, &mut changes).await?;
        changes.record(AccessEvent::PermissionCreated {
            permission_id: permission.id().to_string(),
            name: permission.name().to_string(),
        });
        self.uow.save_changes(changes).await?;

        info!(permission_id = %permission.id(), name = %permission.name(), "Permission created");
        Ok(permission)
    }

    /// Refused while any role or principal still references the permission.
    pub async fn delete(&self, permission_id: &str, ctx: &ExecutionContext) -> Result<()> {
        let permission = self
            .permissions
            .get_for_update(permission_id)
            .await?
            .ok_or_else(|| AccessError::not_found("Permission", permission_id))?;

        let roles = self.roles.find_granting_permission(permission_id).await?;
        let principals = self.principals.find_with_permission(permission_id).await?;
        if !roles.is_empty() || !principals.is_empty() {
            return Err(AccessError::conflict(
                "PERMISSION_IN_USE",
                format!(
                    "Permission '{}' is granted by {} role(s) and {} principal(s)",
                    permission.name(),
                    roles.len(),
                    principals.len()
                ),
            ));
        }

        let mut changes = self.uow.begin(ctx.clone());
        self.permissions.delete(&permission, &mut changes).await?;
        changes.record(AccessEvent::PermissionDeleted {
            permission_id: permission.id().to_string(),
            name: permission.name().to_string(),
        });
        self.uow.save_changes(changes).await?;
        info!(permission_id, name = %permission.name(), "Permission deleted");
        Ok(())
    }

    pub async fn get(&self, permission_id: &str) -> Result<Permission> {
        self.permissions
            .get(permission_id, false)
            .await?
            .ok_or_else(|| AccessError::not_found("Permission", permission_id))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Permission> {
        self.permissions
            .find_by_name(name)
            .await?
            .ok_or_else(|| AccessError::not_found("Permission", name))
    }

    pub async fn find_by_resource(&self, resource: &str) -> Result<Vec<Permission>> {
        self.permissions.find_by_resource(resource).await
    }
}
