//! Role Entity
//!
//! A named bundle of permissions. Roles are shared reference data: deleting a
//! role never touches the permissions it grants.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::permission::Permission;
use crate::shared::association::{self, AssignmentDiff, AssociationRow};
use crate::shared::entity::{eq_ignore_case, normalize_key, Entity, EntityMeta};
use crate::shared::error::{AccessError, Result};
use crate::usecase::domain_event::AccessEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleType {
    /// Seeded by the platform; cannot be renamed or deleted.
    System,
    Custom,
}

/// Role to permission link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermission {
    pub meta: EntityMeta,
    pub role_id: String,
    pub permission_id: String,
    /// Populated only when associations are explicitly loaded.
    #[serde(skip)]
    pub permission: Option<Permission>,
}

impl AssociationRow for RolePermission {
    fn target_id(&self) -> &str {
        &self.permission_id
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub meta: EntityMeta,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    role_type: RoleType,
    #[serde(default)]
    permissions: Vec<RolePermission>,
    #[serde(skip)]
    events: Vec<AccessEvent>,
}

impl Role {
    pub fn new(name: &str, role_type: RoleType) -> Result<Self> {
        let name = Self::validate_name(name)?;
        Ok(Self {
            meta: EntityMeta::new(),
            name,
            description: None,
            role_type,
            permissions: Vec::new(),
            events: Vec::new(),
        })
    }

    fn validate_name(name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AccessError::validation(
                "ROLE_NAME_REQUIRED",
                "Role name must not be empty",
            ));
        }
        Ok(name.to_string())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn role_type(&self) -> RoleType {
        self.role_type
    }

    pub fn is_system(&self) -> bool {
        self.role_type == RoleType::System
    }

    pub fn matches(&self, name: &str) -> bool {
        eq_ignore_case(&self.name, name.trim())
    }

    /// Returns whether the name changed.
    pub fn rename(&mut self, name: &str) -> Result<bool> {
        let name = Self::validate_name(name)?;
        if name == self.name {
            return Ok(false);
        }
        if self.is_system() {
            return Err(AccessError::conflict(
                "SYSTEM_ROLE_IMMUTABLE",
                format!("System role '{}' cannot be renamed", self.name),
            ));
        }
        self.name = name;
        self.meta.touch();
        Ok(true)
    }

    pub fn describe(&mut self, description: impl Into<String>) {
        let description = description.into();
        if self.description.as_deref() != Some(description.as_str()) {
            self.description = Some(description);
            self.meta.touch();
        }
    }

    /// Active permission links.
    pub fn permission_links(&self) -> impl Iterator<Item = &RolePermission> {
        self.permissions.iter().filter(|p| p.is_active())
    }

    /// Every link row, including soft-deleted ones.
    pub fn all_permission_links(&self) -> &[RolePermission] {
        &self.permissions
    }

    pub fn permission_ids(&self) -> Vec<String> {
        association::active_ids(&self.permissions)
    }

    pub fn grants(&self, permission_id: &str) -> bool {
        association::is_assigned(&self.permissions, permission_id)
    }

    /// Idempotent. Returns whether a link was added.
    pub fn add_permission(&mut self, permission: &Permission) -> bool {
        if self.grants(permission.id()) {
            return false;
        }
        association::insert_link(
            &mut self.permissions,
            RolePermission {
                meta: EntityMeta::new(),
                role_id: self.meta.id.clone(),
                permission_id: permission.id().to_string(),
                permission: Some(permission.clone()),
            },
        );
        self.meta.touch();
        self.events.push(AccessEvent::RolePermissionAdded {
            role_id: self.meta.id.clone(),
            permission_id: permission.id().to_string(),
        });
        true
    }

    /// Idempotent. Returns whether a link was removed.
    pub fn remove_permission(&mut self, permission_id: &str) -> bool {
        if !association::soft_remove(&mut self.permissions, permission_id) {
            return false;
        }
        self.meta.touch();
        self.events.push(AccessEvent::RolePermissionRemoved {
            role_id: self.meta.id.clone(),
            permission_id: permission_id.to_string(),
        });
        true
    }

    /// Diff-based replace: links present in both sets are left alone.
    pub fn set_permissions(&mut self, permissions: &[Permission]) -> AssignmentDiff {
        let desired: Vec<&str> = permissions.iter().map(|p| p.id()).collect();
        let (to_add, to_remove) = association::plan_replace(&self.permissions, &desired);

        let mut diff = AssignmentDiff::default();
        for id in to_remove {
            if self.remove_permission(&id) {
                diff.removed.push(id);
            }
        }
        for id in to_add {
            if let Some(permission) = permissions.iter().find(|p| p.id() == id) {
                if self.add_permission(permission) {
                    diff.added.push(id);
                }
            }
        }
        diff
    }

    /// Names of loaded, non-deleted permissions granted by this role.
    pub fn permission_names(&self) -> Vec<&str> {
        self.permission_links()
            .filter_map(|link| link.permission.as_ref())
            .filter(|p| !p.is_deleted())
            .map(|p| p.name())
            .collect()
    }

    /// Case-insensitive check over loaded permission links.
    pub fn has_permission(&self, name: &str) -> bool {
        self.permission_links()
            .filter_map(|link| link.permission.as_ref())
            .any(|p| !p.is_deleted() && p.matches(name))
    }

    /// Whether permission navigations have been populated.
    pub fn associations_loaded(&self) -> bool {
        self.permission_links().all(|link| link.permission.is_some())
    }

    /// Soft-delete the role and its permission links.
    pub fn mark_deleted(&mut self) -> Result<bool> {
        if self.is_system() {
            return Err(AccessError::conflict(
                "SYSTEM_ROLE_IMMUTABLE",
                format!("System role '{}' cannot be deleted", self.name),
            ));
        }
        if !self.meta.mark_deleted() {
            return Ok(false);
        }
        for link in self.permissions.iter_mut() {
            link.meta.mark_deleted();
        }
        self.events.push(AccessEvent::RoleDeleted {
            role_id: self.meta.id.clone(),
            name: self.name.clone(),
        });
        Ok(true)
    }

    pub(crate) fn attach_permissions(&mut self, permissions: &HashMap<String, Permission>) {
        for link in self.permissions.iter_mut().filter(|l| l.is_active()) {
            link.permission = permissions.get(&link.permission_id).cloned();
        }
    }

    pub(crate) fn record(&mut self, event: AccessEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<AccessEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Entity for Role {
    fn table_name() -> &'static str {
        "roles"
    }

    fn entity_type() -> &'static str {
        "Role"
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("name", normalize_key(&self.name))]
    }
}
