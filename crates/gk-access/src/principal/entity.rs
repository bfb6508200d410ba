//! Principal Entity
//!
//! The authenticated identity permission checks are evaluated against. A
//! principal owns its role assignments and direct permission grants; those
//! rows only change through the mutation methods below.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::authorization::resolver;
use crate::permission::Permission;
use crate::role::Role;
use crate::shared::association::{self, AssignmentDiff, AssociationRow};
use crate::shared::entity::{normalize_key, Entity, EntityMeta};
use crate::shared::error::{AccessError, Result};
use crate::usecase::domain_event::AccessEvent;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

/// Opaque password hash in PHC string format (algorithm, parameters, salt, hash).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordCredential(String);

impl PasswordCredential {
    pub fn from_hash(hash: impl Into<String>) -> Result<Self> {
        let hash = hash.into();
        if !hash.starts_with('$') || hash.len() < 16 {
            return Err(AccessError::validation(
                "PASSWORD_HASH_INVALID",
                "Password credential must be a PHC hash string",
            ));
        }
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordCredential(***)")
    }
}

/// Principal to role link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalRole {
    pub meta: EntityMeta,
    pub principal_id: String,
    pub role_id: String,
    /// Populated only when associations are explicitly loaded.
    #[serde(skip)]
    pub role: Option<Role>,
}

impl AssociationRow for PrincipalRole {
    fn target_id(&self) -> &str {
        &self.role_id
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

/// Direct permission grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalPermission {
    pub meta: EntityMeta,
    pub principal_id: String,
    pub permission_id: String,
    /// Populated only when associations are explicitly loaded.
    #[serde(skip)]
    pub permission: Option<Permission>,
}

impl AssociationRow for PrincipalPermission {
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
pub struct Principal {
    pub meta: EntityMeta,
    /// Trimmed and lowercased
    email: String,
    username: String,
    password: PasswordCredential,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    is_active: bool,
    #[serde(default)]
    is_email_confirmed: bool,
    #[serde(default)]
    roles: Vec<PrincipalRole>,
    #[serde(default)]
    permissions: Vec<PrincipalPermission>,
    #[serde(skip)]
    events: Vec<AccessEvent>,
}

impl Principal {
    pub fn new(
        email: &str,
        username: &str,
        password: PasswordCredential,
        first_name: &str,
        last_name: &str,
    ) -> Result<Self> {
        let email = Self::normalize_email(email)?;
        let username = username.trim();
        if username.is_empty() {
            return Err(AccessError::validation(
                "USERNAME_REQUIRED",
                "Username must not be empty",
            ));
        }

        let meta = EntityMeta::new();
        let events = vec![AccessEvent::PrincipalRegistered {
            principal_id: meta.id.clone(),
            email: email.clone(),
            username: username.to_string(),
        }];

        Ok(Self {
            meta,
            email,
            username: username.to_string(),
            password,
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            is_active: true,
            is_email_confirmed: false,
            roles: Vec::new(),
            permissions: Vec::new(),
            events,
        })
    }

    pub fn normalize_email(email: &str) -> Result<String> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AccessError::validation("EMAIL_REQUIRED", "Email must not be empty"));
        }
        if !EMAIL_PATTERN.is_match(&email) {
            return Err(AccessError::validation(
                "EMAIL_INVALID",
                format!("'{}' is not a valid email address", email),
            ));
        }
        Ok(email)
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &PasswordCredential {
        &self.password
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn is_active(&self) -> bool {
        self.is_active && !self.meta.is_deleted
    }

    pub fn is_email_confirmed(&self) -> bool {
        self.is_email_confirmed
    }

    // ── Role assignments ────────────────────────────────────────────────

    /// Active role links.
    pub fn role_links(&self) -> impl Iterator<Item = &PrincipalRole> {
        self.roles.iter().filter(|r| r.is_active())
    }

    /// Every role link row, including soft-deleted ones.
    pub fn all_role_links(&self) -> &[PrincipalRole] {
        &self.roles
    }

    pub fn role_ids(&self) -> Vec<String> {
        association::active_ids(&self.roles)
    }

    /// Idempotent. Returns whether a link was added.
    pub fn add_role(&mut self, role: &Role) -> bool {
        if association::is_assigned(&self.roles, role.id()) {
            return false;
        }
        association::insert_link(
            &mut self.roles,
            PrincipalRole {
                meta: EntityMeta::new(),
                principal_id: self.meta.id.clone(),
                role_id: role.id().to_string(),
                role: Some(role.clone()),
            },
        );
        self.meta.touch();
        self.events.push(AccessEvent::RoleAssigned {
            principal_id: self.meta.id.clone(),
            role_id: role.id().to_string(),
        });
        true
    }

    /// Idempotent. Returns whether a link was removed.
    pub fn remove_role(&mut self, role_id: &str) -> bool {
        if !association::soft_remove(&mut self.roles, role_id) {
            return false;
        }
        self.meta.touch();
        self.events.push(AccessEvent::RoleRemoved {
            principal_id: self.meta.id.clone(),
            role_id: role_id.to_string(),
        });
        true
    }

    /// Diff-based replace: roles present in both sets are left alone.
    pub fn set_roles(&mut self, roles: &[Role]) -> AssignmentDiff {
        let desired: Vec<&str> = roles.iter().map(|r| r.id()).collect();
        let (to_add, to_remove) = association::plan_replace(&self.roles, &desired);

        let mut diff = AssignmentDiff::default();
        for id in to_remove {
            if self.remove_role(&id) {
                diff.removed.push(id);
            }
        }
        for id in to_add {
            if let Some(role) = roles.iter().find(|r| r.id() == id) {
                if self.add_role(role) {
                    diff.added.push(id);
                }
            }
        }
        diff
    }

    /// Case-insensitive check over loaded role links.
    pub fn has_role(&self, name: &str) -> bool {
        self.role_links()
            .filter_map(|link| link.role.as_ref())
            .any(|role| !role.is_deleted() && role.matches(name))
    }

    // ── Direct permission grants ────────────────────────────────────────

    /// Active direct grants.
    pub fn permission_grants(&self) -> impl Iterator<Item = &PrincipalPermission> {
        self.permissions.iter().filter(|p| p.is_active())
    }

    pub fn all_permission_grants(&self) -> &[PrincipalPermission] {
        &self.permissions
    }

    pub fn permission_ids(&self) -> Vec<String> {
        association::active_ids(&self.permissions)
    }

    /// Idempotent. Returns whether a grant was added.
    pub fn add_permission(&mut self, permission: &Permission) -> bool {
        if association::is_assigned(&self.permissions, permission.id()) {
            return false;
        }
        association::insert_link(
            &mut self.permissions,
            PrincipalPermission {
                meta: EntityMeta::new(),
                principal_id: self.meta.id.clone(),
                permission_id: permission.id().to_string(),
                permission: Some(permission.clone()),
            },
        );
        self.meta.touch();
        self.events.push(AccessEvent::PermissionGranted {
            principal_id: self.meta.id.clone(),
            permission_id: permission.id().to_string(),
        });
        true
    }

    /// Idempotent. Returns whether a grant was removed.
    pub fn remove_permission(&mut self, permission_id: &str) -> bool {
        if !association::soft_remove(&mut self.permissions, permission_id) {
            return false;
        }
        self.meta.touch();
        self.events.push(AccessEvent::PermissionRevoked {
            principal_id: self.meta.id.clone(),
            permission_id: permission_id.to_string(),
        });
        true
    }

    /// Diff-based replace of direct grants.
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

    /// Case-insensitive check over loaded associations (direct grants first).
    pub fn has_permission(&self, name: &str) -> bool {
        resolver::has_permission(self, name)
    }

    // ── Account lifecycle ───────────────────────────────────────────────

    pub fn activate(&mut self) -> bool {
        if self.is_active {
            return false;
        }
        self.is_active = true;
        self.meta.touch();
        self.events.push(AccessEvent::PrincipalActivated {
            principal_id: self.meta.id.clone(),
        });
        true
    }

    pub fn deactivate(&mut self) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.meta.touch();
        self.events.push(AccessEvent::PrincipalDeactivated {
            principal_id: self.meta.id.clone(),
        });
        true
    }

    pub fn confirm_email(&mut self) -> bool {
        if self.is_email_confirmed {
            return false;
        }
        self.is_email_confirmed = true;
        self.meta.touch();
        self.events.push(AccessEvent::EmailConfirmed {
            principal_id: self.meta.id.clone(),
        });
        true
    }

    pub fn change_password(&mut self, password: PasswordCredential) {
        self.password = password;
        self.meta.touch();
        self.events.push(AccessEvent::PasswordChanged {
            principal_id: self.meta.id.clone(),
        });
    }

    /// Soft-delete the principal together with every link row it owns.
    /// Roles and permissions themselves are untouched.
    pub fn mark_deleted(&mut self) -> bool {
        if !self.meta.mark_deleted() {
            return false;
        }
        for link in self.roles.iter_mut() {
            link.meta.mark_deleted();
        }
        for grant in self.permissions.iter_mut() {
            grant.meta.mark_deleted();
        }
        self.events.push(AccessEvent::PrincipalDeleted {
            principal_id: self.meta.id.clone(),
        });
        true
    }

    /// Whether role and permission navigations have been populated.
    pub fn associations_loaded(&self) -> bool {
        self.role_links().all(|link| link.role.is_some())
            && self.permission_grants().all(|grant| grant.permission.is_some())
    }

    /// Fill navigations. Links whose target is absent from the maps
    /// (deleted or missing) are left unloaded and resolve to nothing.
    pub(crate) fn attach_associations(
        &mut self,
        roles: &HashMap<String, Role>,
        permissions: &HashMap<String, Permission>,
    ) {
        for link in self.roles.iter_mut().filter(|l| l.is_active()) {
            link.role = roles.get(&link.role_id).cloned();
        }
        for grant in self.permissions.iter_mut().filter(|g| g.is_active()) {
            grant.permission = permissions.get(&grant.permission_id).cloned();
        }
    }

    pub fn take_events(&mut self) -> Vec<AccessEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Entity for Principal {
    fn table_name() -> &'static str {
        "principals"
    }

    fn entity_type() -> &'static str {
        "Principal"
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![
            ("email", self.email.clone()),
            ("username", normalize_key(&self.username)),
        ]
    }
}

/// Caller-facing projection returned by login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalView {
    pub id: String,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_email_confirmed: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl From<&Principal> for PrincipalView {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id().to_string(),
            email: principal.email.clone(),
            username: principal.username.clone(),
            first_name: principal.first_name.clone(),
            last_name: principal.last_name.clone(),
            is_email_confirmed: principal.is_email_confirmed,
            roles: resolver::get_all_roles(principal).into_iter().collect(),
            permissions: resolver::get_all_permissions(principal).into_iter().collect(),
        }
    }
}
