//! Principal loading
//!
//! Whether role and permission navigations are populated is part of every
//! call, never implied by what happens to be loaded already.

use std::collections::HashMap;
use std::sync::Arc;

use super::entity::Principal;
use super::repository::PrincipalRepository;
use crate::permission::{Permission, PermissionRepository};
use crate::role::{Role, RoleRepository};
use crate::shared::entity::Entity;
use crate::shared::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associations {
    /// Link rows only; navigations stay empty.
    Skip,
    /// Populate roles, their permissions and direct grants.
    Include,
}

pub struct PrincipalLoader {
    principals: Arc<dyn PrincipalRepository>,
    roles: Arc<dyn RoleRepository>,
    permissions: Arc<dyn PermissionRepository>,
}

impl PrincipalLoader {
    pub fn new(
        principals: Arc<dyn PrincipalRepository>,
        roles: Arc<dyn RoleRepository>,
        permissions: Arc<dyn PermissionRepository>,
    ) -> Self {
        Self {
            principals,
            roles,
            permissions,
        }
    }

    pub fn principals(&self) -> &Arc<dyn PrincipalRepository> {
        &self.principals
    }

    /// Cached read.
    pub async fn get(&self, id: &str, associations: Associations) -> Result<Option<Principal>> {
        let found = self.principals.get(id, false).await?;
        self.finish(found, associations).await
    }

    /// Source-of-truth read for a read-modify-write.
    pub async fn get_for_update(&self, id: &str) -> Result<Option<Principal>> {
        self.principals.get_for_update(id).await
    }

    /// An `@` selects email lookup, anything else is a username.
    pub async fn find_by_login(&self, login: &str, associations: Associations) -> Result<Option<Principal>> {
        let login = login.trim();
        let found = if login.contains('@') {
            self.principals.find_by_email(login).await?
        } else {
            self.principals.find_by_username(login).await?
        };
        self.finish(found, associations).await
    }

    async fn finish(&self, found: Option<Principal>, associations: Associations) -> Result<Option<Principal>> {
        match (found, associations) {
            (Some(mut principal), Associations::Include) => {
                self.load_associations(&mut principal).await?;
                Ok(Some(principal))
            }
            (found, _) => Ok(found),
        }
    }

    /// Populate navigations. Deleted roles and permissions are absent from
    /// default reads and stay unloaded.
    pub async fn load_associations(&self, principal: &mut Principal) -> Result<()> {
        let mut roles = self.roles.get_many(&principal.role_ids()).await?;

        let mut permission_ids = principal.permission_ids();
        for role in &roles {
            for id in role.permission_ids() {
                if !permission_ids.contains(&id) {
                    permission_ids.push(id);
                }
            }
        }
        let permissions = self.permission_map(&permission_ids).await?;

        for role in roles.iter_mut() {
            role.attach_permissions(&permissions);
        }
        let roles: HashMap<String, Role> = roles
            .into_iter()
            .map(|r| (r.id().to_string(), r))
            .collect();

        principal.attach_associations(&roles, &permissions);
        Ok(())
    }

    pub async fn load_role(&self, role: &mut Role) -> Result<()> {
        let permissions = self.permission_map(&role.permission_ids()).await?;
        role.attach_permissions(&permissions);
        Ok(())
    }

    async fn permission_map(&self, ids: &[String]) -> Result<HashMap<String, Permission>> {
        Ok(self
            .permissions
            .get_many(ids)
            .await?
            .into_iter()
            .map(|p| (p.id().to_string(), p))
            .collect())
    }
}
