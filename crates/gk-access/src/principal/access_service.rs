//! Role assignments and direct permission grants.
//!
//! Every operation reads the principal from the store, applies the aggregate
//! mutation and commits only when something changed.

use std::sync::Arc;

use tracing::info;

use super::entity::Principal;
use super::loader::PrincipalLoader;
use super::repository::PrincipalRepository;
use crate::permission::{Permission, PermissionRepository};
use crate::role::{Role, RoleRepository};
use crate::shared::association::AssignmentDiff;
use crate::shared::error::{AccessError, Result};
use crate::usecase::execution_context::ExecutionContext;
use crate::usecase::unit_of_work::UnitOfWork;

pub struct PrincipalAccessService {
    loader: Arc<PrincipalLoader>,
    principals: Arc<dyn PrincipalRepository>,
    roles: Arc<dyn RoleRepository>,
    permissions: Arc<dyn PermissionRepository>,
    uow: Arc<dyn UnitOfWork>,
}

impl PrincipalAccessService {
    pub fn new(
        loader: Arc<PrincipalLoader>,
        roles: Arc<dyn RoleRepository>,
        permissions: Arc<dyn PermissionRepository>,
        uow: Arc<dyn UnitOfWork>,
    ) -> Self {
        Self {
            principals: loader.principals().clone(),
            loader,
            roles,
            permissions,
            uow,
        }
    }

    /// Returns whether the role was newly assigned.
    pub async fn assign_role(&self, principal_id: &str, role_id: &str, ctx: &ExecutionContext) -> Result<bool> {
        let role = self.role(role_id).await?;
        let mut principal = self.principal(principal_id).await?;
        if !principal.add_role(&role) {
            return Ok(false);
        }
        self.commit(principal, ctx).await?;
        info!(principal_id, role = %role.name(), "Role assigned");
        Ok(true)
    }

    /// Returns whether an assignment was removed.
    pub async fn remove_role(&self, principal_id: &str, role_id: &str, ctx: &ExecutionContext) -> Result<bool> {
        let mut principal = self.principal(principal_id).await?;
        if !principal.remove_role(role_id) {
            return Ok(false);
        }
        self.commit(principal, ctx).await?;
        info!(principal_id, role_id, "Role removed");
        Ok(true)
    }

    pub async fn assign_permission(
        &self,
        principal_id: &str,
        permission_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<bool> {
        let permission = self.permission(permission_id).await?;
        let mut principal = self.principal(principal_id).await?;
        if !principal.add_permission(&permission) {
            return Ok(false);
        }
        self.commit(principal, ctx).await?;
        info!(principal_id, permission = %permission.name(), "Permission granted");
        Ok(true)
    }

    pub async fn remove_permission(
        &self,
        principal_id: &str,
        permission_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<bool> {
        let mut principal = self.principal(principal_id).await?;
        if !principal.remove_permission(permission_id) {
            return Ok(false);
        }
        self.commit(principal, ctx).await?;
        info!(principal_id, permission_id, "Permission revoked");
        Ok(true)
    }

    /// Diff-based replace of the principal's roles. Unknown ids are `NotFound`.
    pub async fn set_roles(
        &self,
        principal_id: &str,
        role_ids: &[String],
        ctx: &ExecutionContext,
    ) -> Result<AssignmentDiff> {
        let mut roles = Vec::with_capacity(role_ids.len());
        for id in role_ids {
            roles.push(self.role(id).await?);
        }
        let mut principal = self.principal(principal_id).await?;
        let diff = principal.set_roles(&roles);
        if !diff.is_empty() {
            self.commit(principal, ctx).await?;
            info!(principal_id, added = diff.added.len(), removed = diff.removed.len(), "Roles replaced");
        }
        Ok(diff)
    }

    /// Diff-based replace of direct grants. Unknown ids are `NotFound`.
    pub async fn set_permissions(
        &self,
        principal_id: &str,
        permission_ids: &[String],
        ctx: &ExecutionContext,
    ) -> Result<AssignmentDiff> {
        let mut permissions = Vec::with_capacity(permission_ids.len());
        for id in permission_ids {
            permissions.push(self.permission(id).await?);
        }
        let mut principal = self.principal(principal_id).await?;
        let diff = principal.set_permissions(&permissions);
        if !diff.is_empty() {
            self.commit(principal, ctx).await?;
            info!(
                principal_id,
                added = diff.added.len(),
                removed = diff.removed.len(),
                "Direct permissions replaced"
            );
        }
        Ok(diff)
    }

    async fn principal(&self, id: &str) -> Result<Principal> {
        self.loader
            .get_for_update(id)
            .await?
            .ok_or_else(|| AccessError::not_found("Principal", id))
    }

    async fn role(&self, id: &str) -> Result<Role> {
        self.roles
            .get(id, false)
            .await?
            .ok_or_else(|| AccessError::not_found("Role", id))
    }

    async fn permission(&self, id: &str) -> Result<Permission> {
        self.permissions
            .get(id, false)
            .await?
            .ok_or_else(|| AccessError::not_found("Permission", id))
    }

    async fn commit(&self, mut principal: Principal, ctx: &ExecutionContext) -> Result<()> {
        let mut changes = self.uow.begin(ctx.clone());
        self.principals.update(&principal, &mut changes).await?;
        changes.record_all(principal.take_events());
        self.uow.save_changes(changes).await?;
        Ok(())
    }
}
