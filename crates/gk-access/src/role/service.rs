//! Role administration.

use std::sync::Arc;

use tracing::info;

use super::entity::{Role, RoleType};
use super::repository::RoleRepository;
use crate::permission::{Permission, PermissionRepository};
use crate::principal::{PrincipalLoader, PrincipalRepository};
use crate::shared::association::AssignmentDiff;
use crate::shared::entity::Entity;
use crate::shared::error::{AccessError, Result};
use crate::usecase::domain_event::AccessEvent;
use crate::usecase::execution_context::ExecutionContext;
use crate::usecase::unit_of_work::UnitOfWork;

#[derive(Debug, Clone)]
pub struct CreateRoleCommand {
    pub name: String,
    pub description: Option<String>,
    pub role_type: RoleType,
    pub permission_ids: Vec<String>,
}

impl CreateRoleCommand {
    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            role_type: RoleType::Custom,
            permission_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRoleCommand {
    pub role_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

pub struct RoleService {
    roles: Arc<dyn RoleRepository>,
    permissions: Arc<dyn PermissionRepository>,
    principals: Arc<dyn PrincipalRepository>,
    loader: Arc<PrincipalLoader>,
    uow: Arc<dyn UnitOfWork>,
}

impl RoleService {
    pub fn new(
        roles: Arc<dyn RoleRepository>,
        permissions: Arc<dyn PermissionRepository>,
        loader: Arc<PrincipalLoader>,
        uow: Arc<dyn UnitOfWork>,
    ) -> Self {
        Self {
            roles,
            permissions,
            principals: loader.principals().clone(),
            loader,
            uow,
        }
    }

    pub async fn create(&self, command: CreateRoleCommand, ctx: &ExecutionContext) -> Result<Role> {
        if self.roles.exists_by_name(&command.name).await? {
            return Err(AccessError::conflict(
                "ROLE_EXISTS",
                format!("Role '{}' already exists", command.name.trim()),
            ));
        }
        let permissions = self.permissions_by_id(&command.permission_ids).await?;

        let mut role = Role::new(&command.name, command.role_type)?;
        if let Some(description) = command.description {
            role = role.with_description(description);
        }
        role.set_permissions(&permissions);

        let mut changes = self.uow.begin(ctx.clone());
        self.roles.insert(&role, &mut changes).await?;
        changes.record(AccessEvent::RoleCreated {
            role_id: role.id().to_string(),
            name: role.name().to_string(),
        });
        changes.record_all(role.take_events());
        self.uow.save_changes(changes).await?;

        info!(role_id = %role.id(), name = %role.name(), "Role created");
        Ok(role)
    }

    /// Rename and/or re-describe. System roles cannot be renamed.
    pub async fn update(&self, command: UpdateRoleCommand, ctx: &ExecutionContext) -> Result<Role> {
        let mut role = self.load_for_update(&command.role_id).await?;
        let mut changed = false;

        if let Some(name) = &command.name {
            if !role.matches(name) {
                if let Some(other) = self.roles.find_by_name(name).await? {
                    if other.id() != role.id() {
                        return Err(AccessError::conflict(
                            "ROLE_EXISTS",
                            format!("Role '{}' already exists", name.trim()),
                        ));
                    }
                }
            }
            changed |= role.rename(name)?;
        }
        if let Some(description) = command.description {
            let before = role.description().map(str::to_string);
            role.describe(description);
            changed |= role.description().map(str::to_string) != before;
        }
        if !changed {
            return Ok(role);
        }

        role.record(AccessEvent::RoleUpdated {
            role_id: role.id().to_string(),
            name: role.name().to_string(),
        });
        self.commit(&mut role, ctx).await?;
        info!(role_id = %role.id(), name = %role.name(), "Role updated");
        Ok(role)
    }

    /// Refused while any principal holds the role, and for system roles.
    pub async fn delete(&self, role_id: &str, ctx: &ExecutionContext) -> Result<()> {
        let mut role = self.load_for_update(role_id).await?;
        let holders = self.principals.find_holding_role(role_id).await?;
        if !holders.is_empty() {
            return Err(AccessError::conflict(
                "ROLE_IN_USE",
                format!("Role '{}' is assigned to {} principal(s)", role.name(), holders.len()),
            ));
        }
        if !role.mark_deleted()? {
            return Ok(());
        }

        let mut changes = self.uow.begin(ctx.clone());
        self.roles.delete(&role, &mut changes).await?;
        changes.record_all(role.take_events());
        self.uow.save_changes(changes).await?;
        info!(role_id, name = %role.name(), "Role deleted");
        Ok(())
    }

    /// Diff-based replace of the role's permissions.
    pub async fn set_permissions(
        &self,
        role_id: &str,
        permission_ids: &[String],
        ctx: &ExecutionContext,
    ) -> Result<AssignmentDiff> {
        let permissions = self.permissions_by_id(permission_ids).await?;
        let mut role = self.load_for_update(role_id).await?;
        let diff = role.set_permissions(&permissions);
        if !diff.is_empty() {
            self.commit(&mut role, ctx).await?;
            info!(role_id, added = diff.added.len(), removed = diff.removed.len(), "Role permissions replaced");
        }
        Ok(diff)
    }

    pub async fn add_permission(&self, role_id: &str, permission_id: &str, ctx: &ExecutionContext) -> Result<bool> {
        let permission = self.permission(permission_id).await?;
        let mut role = self.load_for_update(role_id).await?;
        if !role.add_permission(&permission) {
            return Ok(false);
        }
        self.commit(&mut role, ctx).await?;
        Ok(true)
    }

    pub async fn remove_permission(&self, role_id: &str, permission_id: &str, ctx: &ExecutionContext) -> Result<bool> {
        let mut role = self.load_for_update(role_id).await?;
        if !role.remove_permission(permission_id) {
            return Ok(false);
        }
        self.commit(&mut role, ctx).await?;
        Ok(true)
    }

    /// With permissions loaded.
    pub async fn get(&self, role_id: &str) -> Result<Role> {
        let mut role = self
            .roles
            .get(role_id, false)
            .await?
            .ok_or_else(|| AccessError::not_found("Role", role_id))?;
        self.loader.load_role(&mut role).await?;
        Ok(role)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Role> {
        let mut role = self
            .roles
            .find_by_name(name)
            .await?
            .ok_or_else(|| AccessError::not_found("Role", name))?;
        self.loader.load_role(&mut role).await?;
        Ok(role)
    }

    async fn load_for_update(&self, role_id: &str) -> Result<Role> {
        self.roles
            .get_for_update(role_id)
            .await?
            .ok_or_else(|| AccessError::not_found("Role", role_id))
    }

    async fn permission(&self, id: &str) -> Result<Permission> {
        self.permissions
            .get(id, false)
            .await?
            .ok_or_else(|| AccessError::not_found("Permission", id))
    }

    async fn permissions_by_id(&self, ids: &[String]) -> Result<Vec<Permission>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            found.push(self.permission(id).await?);
        }
        Ok(found)
    }

    async fn commit(&self, role: &mut Role, ctx: &ExecutionContext) -> Result<()> {
        let mut changes = self.uow.begin(ctx.clone());
        self.roles.update(role, &mut changes).await?;
        changes.record_all(role.take_events());
        self.uow.save_changes(changes).await?;
        Ok(())
    }
}
