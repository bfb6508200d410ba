//! Audit Log Entity
//!
//! One row per domain event, written in the same commit as the change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::entity::{Entity, EntityMeta};
use crate::usecase::domain_event::EventEnvelope;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub meta: EntityMeta,
    pub event_id: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    /// The principal that performed the operation
    pub principal_id: String,
    pub correlation_id: String,
    pub execution_id: String,
    /// Full event payload
    pub payload: serde_json::Value,
    pub performed_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn from_envelope(envelope: &EventEnvelope) -> crate::Result<Self> {
        let (entity_type, entity_id) = envelope.event.subject();
        let mut meta = EntityMeta::new();
        meta.created_by = Some(envelope.principal_id.clone());
        Ok(Self {
            meta,
            event_id: envelope.event_id.clone(),
            event_type: envelope.event.event_type().to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            principal_id: envelope.principal_id.clone(),
            correlation_id: envelope.correlation_id.clone(),
            execution_id: envelope.execution_id.clone(),
            payload: serde_json::to_value(&envelope.event)?,
            performed_at: envelope.occurred_at,
        })
    }
}

impl Entity for AuditLog {
    fn table_name() -> &'static str {
        "audit_logs"
    }

    fn entity_type() -> &'static str {
        "AuditLog"
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::{AccessEvent, ExecutionContext};

    #[test]
    fn test_from_envelope() {
        let ctx = ExecutionContext::with_correlation("admin-1", "corr-1");
        let envelope = EventEnvelope::new(
            &ctx,
            AccessEvent::RoleCreated {
                role_id: "r1".into(),
                name: "Manager".into(),
            },
        );

        let log = AuditLog::from_envelope(&envelope).unwrap();
        assert_eq!(log.event_type, "gatekeeper:role:created");
        assert_eq!(log.entity_type, "Role");
        assert_eq!(log.entity_id, "r1");
        assert_eq!(log.principal_id, "admin-1");
        assert_eq!(log.correlation_id, "corr-1");
        assert_eq!(log.payload["name"], "Manager");
    }
}
