//! Execution Context
//!
//! Carries tracing ids and the acting principal through one use-case
//! execution. Domain event envelopes and audit rows are stamped from it.

use chrono::{DateTime, Utc};

use crate::shared::tsid::TsidGenerator;

/// Principal id recorded for work the system performs on its own behalf.
pub const SYSTEM_PRINCIPAL: &str = "system";

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Unique ID for this execution (generated)
    pub execution_id: String,
    /// ID for distributed tracing (usually from original request)
    pub correlation_id: String,
    /// ID of the parent event that caused this execution (if any)
    pub causation_id: Option<String>,
    /// ID of the principal performing the action
    pub principal_id: String,
    pub initiated_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Fresh context; the correlation id starts as the execution id.
    pub fn create(principal_id: impl Into<String>) -> Self {
        let exec_id = format!("exec-{}", TsidGenerator::generate());
        Self {
            execution_id: exec_id.clone(),
            correlation_id: exec_id,
            causation_id: None,
            principal_id: principal_id.into(),
            initiated_at: Utc::now(),
        }
    }

    pub fn system() -> Self {
        Self::create(SYSTEM_PRINCIPAL)
    }

    /// Context continuing an upstream correlation id (e.g. from a request header).
    pub fn with_correlation(
        principal_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: format!("exec-{}", TsidGenerator::generate()),
            correlation_id: correlation_id.into(),
            causation_id: None,
            principal_id: principal_id.into(),
            initiated_at: Utc::now(),
        }
    }

    /// Child context within the same execution, caused by `causing_event_id`.
    pub fn with_causation(&self, causing_event_id: impl Into<String>) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            correlation_id: self.correlation_id.clone(),
            causation_id: Some(causing_event_id.into()),
            principal_id: self.principal_id.clone(),
            initiated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_correlates_to_execution() {
        let ctx = ExecutionContext::create("principal-1");
        assert!(ctx.execution_id.starts_with("exec-"));
        assert_eq!(ctx.execution_id, ctx.correlation_id);
        assert!(ctx.causation_id.is_none());
    }

    #[test]
    fn test_with_causation_keeps_correlation() {
        let ctx = ExecutionContext::with_correlation("principal-1", "corr-42");
        let child = ctx.with_causation("evt-1");
        assert_eq!(child.correlation_id, "corr-42");
        assert_eq!(child.execution_id, ctx.execution_id);
        assert_eq!(child.causation_id.as_deref(), Some("evt-1"));
    }
}
