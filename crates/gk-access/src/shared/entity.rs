//! Common entity shape
//!
//! Every persisted row carries an [`EntityMeta`]: identity, audit timestamps,
//! the soft-delete flag and the row version used for optimistic concurrency.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::tsid::TsidGenerator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Assigned by the store on every successful write.
    #[serde(default)]
    pub version: u64,
}

impl EntityMeta {
    pub fn new() -> Self {
        Self {
            id: TsidGenerator::generate(),
            created_at: Utc::now(),
            created_by: None,
            updated_at: None,
            updated_by: None,
            is_deleted: false,
            deleted_at: None,
            version: 0,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    /// Returns false if the row was already deleted.
    pub fn mark_deleted(&mut self) -> bool {
        if self.is_deleted {
            return false;
        }
        let now = Utc::now();
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = Some(now);
        true
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A persisted row type.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Storage table name, also the cache key namespace.
    fn table_name() -> &'static str;

    /// Human-readable type name for errors.
    fn entity_type() -> &'static str;

    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    fn id(&self) -> &str {
        &self.meta().id
    }

    fn is_deleted(&self) -> bool {
        self.meta().is_deleted
    }

    /// Unique index entries as `(index, normalized value)` pairs.
    /// Soft-deleted rows do not participate.
    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Normalized form of a case-insensitive key (names, emails, usernames).
pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Case-insensitive name comparison used for every role/permission lookup.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_deleted_once() {
        let mut meta = EntityMeta::new();
        assert!(meta.mark_deleted());
        let deleted_at = meta.deleted_at;
        assert!(!meta.mark_deleted());
        assert_eq!(meta.deleted_at, deleted_at);
    }

    #[test]
    fn test_case_insensitive_helpers() {
        assert!(eq_ignore_case("Order.Read", "order.read"));
        assert!(eq_ignore_case("ÄRGER.Read", "ärger.read"));
        assert!(!eq_ignore_case("Order.Read", "Order.Write"));
        assert_eq!(normalize_key("  Manager "), "manager");
    }
}
