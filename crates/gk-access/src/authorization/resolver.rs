//! Permission Resolution
//!
//! Pure functions over a principal whose associations are already loaded.
//! The role to permission relation is flat: no role hierarchy, no deny
//! rules and no attribute conditions, so resolution is a single pass of set
//! construction.
//!
//! Unloaded or soft-deleted links, roles and permissions contribute nothing.

use std::collections::{BTreeSet, HashSet};

use crate::permission::Permission;
use crate::principal::Principal;
use crate::role::Role;
use crate::shared::entity::{normalize_key, Entity};

/// Active roles whose navigation is loaded.
fn held_roles(principal: &Principal) -> impl Iterator<Item = &Role> {
    principal
        .role_links()
        .filter_map(|link| link.role.as_ref())
        .filter(|role| !role.is_deleted())
}

fn direct_permissions(principal: &Principal) -> impl Iterator<Item = &Permission> {
    principal
        .permission_grants()
        .filter_map(|grant| grant.permission.as_ref())
        .filter(|p| !p.is_deleted())
}

fn role_permissions(role: &Role) -> impl Iterator<Item = &Permission> {
    role.permission_links()
        .filter_map(|link| link.permission.as_ref())
        .filter(|p| !p.is_deleted())
}

/// Direct grants followed by role-inherited grants, in that order.
fn all_permissions(principal: &Principal) -> impl Iterator<Item = &Permission> {
    direct_permissions(principal).chain(held_roles(principal).flat_map(role_permissions))
}

/// Effective permission names, deduplicated case-insensitively.
/// The first spelling seen is kept.
pub fn get_all_permissions(principal: &Principal) -> BTreeSet<String> {
    let mut seen = HashSet::new();
    all_permissions(principal)
        .filter(|p| seen.insert(normalize_key(p.name())))
        .map(|p| p.name().to_string())
        .collect()
}

/// Names of every active role the principal holds.
pub fn get_all_roles(principal: &Principal) -> BTreeSet<String> {
    let mut seen = HashSet::new();
    held_roles(principal)
        .filter(|r| seen.insert(normalize_key(r.name())))
        .map(|r| r.name().to_string())
        .collect()
}

/// Direct grants are checked first, then role grants; returns on first match.
pub fn has_permission(principal: &Principal, name: &str) -> bool {
    if direct_permissions(principal).any(|p| p.matches(name)) {
        return true;
    }
    held_roles(principal).any(|role| role_permissions(role).any(|p| p.matches(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::PasswordCredential;
    use crate::role::RoleType;

    fn principal() -> Principal {
        let credential =
            PasswordCredential::from_hash("$argon2id$v=19$m=4096,t=1,p=1$c2FsdA$aGFzaA").unwrap();
        Principal::new("p@example.com", "p", credential, "P", "P").unwrap()
    }

    fn perm(name: &str) -> Permission {
        let (resource, action) = name.split_once('.').unwrap();
        Permission::new(resource, action, None).unwrap()
    }

    fn role_with(name: &str, permissions: &[&Permission]) -> Role {
        let mut role = Role::new(name, RoleType::Custom).unwrap();
        for p in permissions {
            role.add_permission(p);
        }
        role
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_manager_example() {
        let read = perm("Order.Read");
        let approve = perm("Order.Approve");
        let export = perm("Report.Export");
        let manager = role_with("Manager", &[&read, &approve]);

        let mut p = principal();
        p.add_role(&manager);
        p.add_permission(&export);

        assert_eq!(
            names(&get_all_permissions(&p)),
            vec!["Order.Approve", "Order.Read", "Report.Export"]
        );
        assert!(has_permission(&p, "order.read"));
        assert!(has_permission(&p, "REPORT.EXPORT"));
        assert!(!has_permission(&p, "Order.Delete"));
        assert_eq!(names(&get_all_roles(&p)), vec!["Manager"]);
    }

    #[test]
    fn test_union_dedupes_case_insensitively() {
        let direct = Permission::new("Order", "Read", Some("order.read")).unwrap();
        let via_role = perm("Order.Read");
        let role = role_with("Clerk", &[&via_role]);

        let mut p = principal();
        p.add_permission(&direct);
        p.add_role(&role);

        // Direct grant is seen first
        assert_eq!(names(&get_all_permissions(&p)), vec!["order.read"]);
    }

    #[test]
    fn test_overlapping_roles_union() {
        let a = perm("Doc.Read");
        let b = perm("Doc.Write");
        let c = perm("Doc.Share");
        let mut p = principal();
        p.add_role(&role_with("Reader", &[&a]));
        p.add_role(&role_with("Editor", &[&a, &b]));
        p.add_role(&role_with("Owner", &[&b, &c]));

        assert_eq!(
            names(&get_all_permissions(&p)),
            vec!["Doc.Read", "Doc.Share", "Doc.Write"]
        );
    }

    #[test]
    fn test_deleted_rows_contribute_nothing() {
        let kept = perm("Order.Read");
        let mut gone = perm("Order.Purge");
        gone.meta.mark_deleted();

        let mut deleted_role = role_with("Legacy", &[&kept]);
        deleted_role.mark_deleted().unwrap();

        let mut removed_link = role_with("Auditor", &[&kept]);
        removed_link.remove_permission(kept.id());

        let mut p = principal();
        p.add_role(&deleted_role);
        p.add_role(&removed_link);
        p.add_permission(&gone);

        assert!(get_all_permissions(&p).is_empty());
        assert!(!has_permission(&p, "Order.Read"));
        assert!(!has_permission(&p, "Order.Purge"));
        assert_eq!(names(&get_all_roles(&p)), vec!["Auditor"]);
    }

    #[test]
    fn test_removed_role_link_is_ignored() {
        let read = perm("Order.Read");
        let role = role_with("Manager", &[&read]);
        let mut p = principal();
        p.add_role(&role);
        p.remove_role(role.id());

        assert!(get_all_permissions(&p).is_empty());
        assert!(get_all_roles(&p).is_empty());
    }
}
