//! Association rows
//!
//! Many-to-many links (principal to role, role to permission, principal to
//! permission) are rows owned by one aggregate. Removing a link soft-deletes
//! its row; re-adding the target replaces that tombstone. At most one row,
//! active or not, exists per target, so assign/remove cycles do not grow the
//! aggregate. The audit trail keeps the full history.

use serde::{Deserialize, Serialize};

use super::entity::EntityMeta;

pub trait AssociationRow {
    fn target_id(&self) -> &str;
    fn meta(&self) -> &EntityMeta;
    fn meta_mut(&mut self) -> &mut EntityMeta;

    fn is_active(&self) -> bool {
        !self.meta().is_deleted
    }
}

/// Result of a diff-based replace: only these targets were written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl AssignmentDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub(crate) fn is_assigned<A: AssociationRow>(rows: &[A], target_id: &str) -> bool {
    rows.iter().any(|r| r.is_active() && r.target_id() == target_id)
}

pub(crate) fn active_ids<A: AssociationRow>(rows: &[A]) -> Vec<String> {
    rows.iter()
        .filter(|r| r.is_active())
        .map(|r| r.target_id().to_string())
        .collect()
}

/// Insert `row`, replacing a tombstone for the same target if one exists.
/// Callers check [`is_assigned`] first.
pub(crate) fn insert_link<A: AssociationRow>(rows: &mut Vec<A>, row: A) {
    match rows.iter().position(|r| r.target_id() == row.target_id()) {
        Some(index) => rows[index] = row,
        None => rows.push(row),
    }
}

/// Soft-delete the active row for `target_id`. Returns false if none existed.
pub(crate) fn soft_remove<A: AssociationRow>(rows: &mut [A], target_id: &str) -> bool {
    match rows
        .iter_mut()
        .find(|r| r.is_active() && r.target_id() == target_id)
    {
        Some(row) => row.meta_mut().mark_deleted(),
        None => false,
    }
}

/// Targets to add and remove to turn the active set into `desired`.
/// Targets present in both are untouched.
pub(crate) fn plan_replace<A: AssociationRow>(
    rows: &[A],
    desired: &[&str],
) -> (Vec<String>, Vec<String>) {
    let mut to_add: Vec<String> = Vec::new();
    for id in desired {
        if !is_assigned(rows, id) && !to_add.iter().any(|a| a == id) {
            to_add.push(id.to_string());
        }
    }
    let to_remove = active_ids(rows)
        .into_iter()
        .filter(|id| !desired.contains(&id.as_str()))
        .collect();
    (to_add, to_remove)
}
