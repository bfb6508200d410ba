//! Permission Entity
//!
//! A named capability, conventionally `"<Resource>.<Action>"`. The name is
//! the comparison key everywhere and is matched case-insensitively.

use serde::{Deserialize, Serialize};

use crate::shared::entity::{eq_ignore_case, normalize_key, Entity, EntityMeta};
use crate::shared::error::{AccessError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub meta: EntityMeta,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    resource: String,
    action: String,
}

impl Permission {
    /// `name` defaults to `"{resource}.{action}"`.
    pub fn new(resource: &str, action: &str, name: Option<&str>) -> Result<Self> {
        let resource = resource.trim();
        let action = action.trim();
        if resource.is_empty() {
            return Err(AccessError::validation(
                "RESOURCE_REQUIRED",
                "Permission resource must not be empty",
            ));
        }
        if action.is_empty() {
            return Err(AccessError::validation(
                "ACTION_REQUIRED",
                "Permission action must not be empty",
            ));
        }
        let name = match name.map(str::trim) {
            Some("") => {
                return Err(AccessError::validation(
                    "NAME_REQUIRED",
                    "Permission name must not be empty",
                ))
            }
            Some(name) => name.to_string(),
            None => format!("{}.{}", resource, action),
        };

        Ok(Self {
            meta: EntityMeta::new(),
            name,
            description: None,
            resource: resource.to_string(),
            action: action.to_string(),
        })
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

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn matches(&self, name: &str) -> bool {
        eq_ignore_case(&self.name, name.trim())
    }

    pub fn describe(&mut self, description: impl Into<String>) {
        let description = description.into();
        if self.description.as_deref() != Some(description.as_str()) {
            self.description = Some(description);
            self.meta.touch();
        }
    }
}

impl Entity for Permission {
    fn table_name() -> &'static str {
        "permissions"
    }

    fn entity_type() -> &'static str {
        "Permission"
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
