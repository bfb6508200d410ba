//! Cache key layout
//!
//! Every cached lookup of an entity has a key derived here, and
//! [`CachedEntity::cache_keys`] lists every key an entity state can occupy.
//! A write invalidates the keys of both the previous and the new state, so a
//! lookup added here without a matching `secondary_keys` entry goes stale.

use crate::auth::RefreshToken;
use crate::permission::Permission;
use crate::principal::Principal;
use crate::role::Role;
use crate::shared::entity::{normalize_key, Entity};

pub trait CachedEntity: Entity {
    fn cache_namespace() -> &'static str;

    fn id_key(id: &str) -> String {
        format!("{}:id:{}", Self::cache_namespace(), id)
    }

    /// Keys of secondary-index lookups this state is reachable through.
    fn secondary_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn cache_keys(&self) -> Vec<String> {
        let mut keys = vec![Self::id_key(self.id())];
        keys.extend(self.secondary_keys());
        keys
    }
}

pub fn principal_by_email(email: &str) -> String {
    format!("principal:email:{}", normalize_key(email))
}

pub fn principal_by_username(username: &str) -> String {
    format!("principal:username:{}", normalize_key(username))
}

pub fn role_by_name(name: &str) -> String {
    format!("role:name:{}", normalize_key(name))
}

pub fn permission_by_name(name: &str) -> String {
    format!("permission:name:{}", normalize_key(name))
}

pub fn permissions_by_resource(resource: &str) -> String {
    format!("permission:resource:{}", normalize_key(resource))
}

/// Token hashes are case-sensitive base64url and are not folded.
pub fn refresh_token_by_hash(token_hash: &str) -> String {
    format!("refresh_token:hash:{}", token_hash)
}

impl CachedEntity for Principal {
    fn cache_namespace() -> &'static str {
        "principal"
    }

    fn secondary_keys(&self) -> Vec<String> {
        vec![
            principal_by_email(self.email()),
            principal_by_username(self.username()),
        ]
    }
}

impl CachedEntity for Role {
    fn cache_namespace() -> &'static str {
        "role"
    }

    fn secondary_keys(&self) -> Vec<String> {
        vec![role_by_name(self.name())]
    }
}

impl CachedEntity for Permission {
    fn cache_namespace() -> &'static str {
        "permission"
    }

    fn secondary_keys(&self) -> Vec<String> {
        vec![
            permission_by_name(self.name()),
            permissions_by_resource(self.resource()),
        ]
    }
}

impl CachedEntity for RefreshToken {
    fn cache_namespace() -> &'static str {
        "refresh_token"
    }

    fn secondary_keys(&self) -> Vec<String> {
        vec![refresh_token_by_hash(&self.token_hash)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleType;

    #[test]
    fn test_secondary_keys_are_case_folded() {
        let role = Role::new("Manager", RoleType::Custom).unwrap();
        assert_eq!(role.cache_keys()[1], "role:name:manager");
        assert_eq!(role_by_name("MANAGER "), "role:name:manager");
    }

    #[test]
    fn test_permission_keys_cover_name_and_resource() {
        let p = Permission::new("Order", "Read", None).unwrap();
        assert_eq!(
            p.cache_keys(),
            vec![
                format!("permission:id:{}", p.id()),
                "permission:name:order.read".to_string(),
                "permission:resource:order".to_string(),
            ]
        );
    }
}
