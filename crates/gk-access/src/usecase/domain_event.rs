//! Domain Events
//!
//! Every business-visible change in the access core is an [`AccessEvent`].
//! Events are recorded on aggregates or staged on a change set, persisted as
//! audit rows inside the commit, then handed to the [`EventDispatcher`].
//!
//! Handlers are registered once at startup against an [`EventKind`]; dispatch
//! is a map lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::execution_context::ExecutionContext;
use crate::shared::error::Result;
use crate::shared::tsid::TsidGenerator;

/// Why a principal's refresh tokens were revoked in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    LogoutEverywhere,
    PasswordChanged,
    AccountDeactivated,
    AccountDeleted,
    ReuseDetected,
}

/// Declares [`AccessEvent`] and its fieldless mirror [`EventKind`] together.
macro_rules! access_events {
    ($( $(#[$doc:meta])* $variant:ident => $event_type:literal { $($field:ident : $ty:ty),* $(,)? } ),* $(,)?) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
        pub enum AccessEvent {
            $( $(#[$doc])* $variant { $($field: $ty),* } ),*
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $( $variant ),*
        }

        impl AccessEvent {
            pub fn kind(&self) -> EventKind {
                match self {
                    $( AccessEvent::$variant { .. } => EventKind::$variant ),*
                }
            }
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[ $( EventKind::$variant ),* ];

            /// Event type code, format `gatekeeper:{aggregate}:{action}`.
            pub fn event_type(self) -> &'static str {
                match self {
                    $( EventKind::$variant => $event_type ),*
                }
            }
        }
    };
}

access_events! {
    PrincipalRegistered => "gatekeeper:principal:registered" { principal_id: String, email: String, username: String },
    PrincipalActivated => "gatekeeper:principal:activated" { principal_id: String },
    PrincipalDeactivated => "gatekeeper:principal:deactivated" { principal_id: String },
    PrincipalDeleted => "gatekeeper:principal:deleted" { principal_id: String },
    PasswordChanged => "gatekeeper:principal:password-changed" { principal_id: String },
    EmailConfirmed => "gatekeeper:principal:email-confirmed" { principal_id: String },
    RoleAssigned => "gatekeeper:principal:role-assigned" { principal_id: String, role_id: String },
    RoleRemoved => "gatekeeper:principal:role-removed" { principal_id: String, role_id: String },
    PermissionGranted => "gatekeeper:principal:permission-granted" { principal_id: String, permission_id: String },
    PermissionRevoked => "gatekeeper:principal:permission-revoked" { principal_id: String, permission_id: String },

    RoleCreated => "gatekeeper:role:created" { role_id: String, name: String },
    RoleUpdated => "gatekeeper:role:updated" { role_id: String, name: String },
    RoleDeleted => "gatekeeper:role:deleted" { role_id: String, name: String },
    RolePermissionAdded => "gatekeeper:role:permission-added" { role_id: String, permission_id: String },
    RolePermissionRemoved => "gatekeeper:role:permission-removed" { role_id: String, permission_id: String },

    PermissionCreated => "gatekeeper:permission:created" { permission_id: String, name: String },
    PermissionDeleted => "gatekeeper:permission:deleted" { permission_id: String, name: String },

    LoggedIn => "gatekeeper:session:logged-in" { principal_id: String },
    RefreshTokenIssued => "gatekeeper:session:token-issued" { principal_id: String, token_id: String },
    RefreshTokenRotated => "gatekeeper:session:token-rotated" { principal_id: String, token_id: String, replacement_id: String },
    RefreshTokenRevoked => "gatekeeper:session:token-revoked" { principal_id: String, token_id: String },
    RefreshTokensRevoked => "gatekeeper:session:tokens-revoked" { principal_id: String, count: usize, reason: RevocationReason },
    /// Security-critical: a rotated or revoked token was replayed.
    RefreshTokenReuseDetected => "gatekeeper:session:token-reuse-detected" { principal_id: String, token_id: String },
}

impl AccessEvent {
    pub fn event_type(&self) -> &'static str {
        self.kind().event_type()
    }

    /// The aggregate this event is about, as `(entity type, entity id)`.
    pub fn subject(&self) -> (&'static str, &str) {
        use AccessEvent::*;
        match self {
            PrincipalRegistered { principal_id, .. }
            | PrincipalActivated { principal_id }
            | PrincipalDeactivated { principal_id }
            | PrincipalDeleted { principal_id }
            | PasswordChanged { principal_id }
            | EmailConfirmed { principal_id }
            | RoleAssigned { principal_id, .. }
            | RoleRemoved { principal_id, .. }
            | PermissionGranted { principal_id, .. }
            | PermissionRevoked { principal_id, .. }
            | LoggedIn { principal_id }
            | RefreshTokensRevoked { principal_id, .. } => ("Principal", principal_id.as_str()),
            RoleCreated { role_id, .. }
            | RoleUpdated { role_id, .. }
            | RoleDeleted { role_id, .. }
            | RolePermissionAdded { role_id, .. }
            | RolePermissionRemoved { role_id, .. } => ("Role", role_id.as_str()),
            PermissionCreated { permission_id, .. } | PermissionDeleted { permission_id, .. } => {
                ("Permission", permission_id.as_str())
            }
            RefreshTokenIssued { token_id, .. }
            | RefreshTokenRotated { token_id, .. }
            | RefreshTokenRevoked { token_id, .. }
            | RefreshTokenReuseDetected { token_id, .. } => ("RefreshToken", token_id.as_str()),
        }
    }
}

/// An event plus the metadata of the execution that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: String,
    pub occurred_at: DateTime<Utc>,
    pub execution_id: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    pub principal_id: String,
    pub event: AccessEvent,
}

impl EventEnvelope {
    pub fn new(ctx: &ExecutionContext, event: AccessEvent) -> Self {
        Self {
            event_id: TsidGenerator::generate(),
            occurred_at: Utc::now(),
            execution_id: ctx.execution_id.clone(),
            correlation_id: ctx.correlation_id.clone(),
            causation_id: ctx.causation_id.clone(),
            principal_id: ctx.principal_id.clone(),
            event,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Static event-kind to handler registry, built once at startup.
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    pub fn builder() -> EventDispatcherBuilder {
        EventDispatcherBuilder::default()
    }

    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Handler failures are logged and never propagate: events are dispatched
    /// after the commit that produced them.
    pub async fn dispatch(&self, envelope: &EventEnvelope) {
        let Some(handlers) = self.handlers.get(&envelope.kind()) else {
            return;
        };
        for handler in handlers {
            if let Err(e) = handler.handle(envelope).await {
                warn!(
                    handler = handler.name(),
                    event_type = envelope.event.event_type(),
                    event_id = %envelope.event_id,
                    error = %e,
                    "Event handler failed"
                );
            }
        }
    }

    pub async fn dispatch_all(&self, envelopes: &[EventEnvelope]) {
        for envelope in envelopes {
            self.dispatch(envelope).await;
        }
    }
}

#[derive(Default)]
pub struct EventDispatcherBuilder {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcherBuilder {
    pub fn on(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    pub fn on_many(mut self, kinds: &[EventKind], handler: Arc<dyn EventHandler>) -> Self {
        for kind in kinds {
            self = self.on(*kind, handler.clone());
        }
        self
    }

    pub fn on_all(self, handler: Arc<dyn EventHandler>) -> Self {
        self.on_many(EventKind::ALL, handler)
    }

    /// Registers the built-in structured-log and security-alert handlers.
    pub fn with_defaults(self) -> Self {
        self.on_all(Arc::new(LoggingEventHandler))
            .on(EventKind::RefreshTokenReuseDetected, Arc::new(SecurityAlertHandler))
    }

    pub fn build(self) -> EventDispatcher {
        EventDispatcher {
            handlers: self.handlers,
        }
    }
}

/// Emits one structured log line per event.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let (entity_type, entity_id) = envelope.event.subject();
        info!(
            event_type = envelope.event.event_type(),
            event_id = %envelope.event_id,
            entity_type,
            entity_id,
            principal_id = %envelope.principal_id,
            correlation_id = %envelope.correlation_id,
            "Domain event"
        );
        Ok(())
    }
}

/// Raises an error-level alert for token theft signals.
pub struct SecurityAlertHandler;

#[async_trait]
impl EventHandler for SecurityAlertHandler {
    fn name(&self) -> &'static str {
        "security-alert"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        if let AccessEvent::RefreshTokenReuseDetected { principal_id, token_id } = &envelope.event {
            error!(
                alert = "refresh_token_reuse",
                principal_id = %principal_id,
                token_id = %token_id,
                correlation_id = %envelope.correlation_id,
                "SECURITY: refresh token replay detected, all sessions revoked"
            );
        }
        Ok(())
    }
}
