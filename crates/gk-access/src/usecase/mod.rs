//! Use-case infrastructure: execution context, domain events and the unit of work.

pub mod domain_event;
pub mod execution_context;
pub mod unit_of_work;

pub use domain_event::{
    AccessEvent, EventDispatcher, EventDispatcherBuilder, EventEnvelope, EventHandler, EventKind,
    LoggingEventHandler, RevocationReason, SecurityAlertHandler,
};
pub use execution_context::ExecutionContext;
pub use unit_of_work::{ChangeOp, ChangeSet, ConflictPolicy, StagedChange, UnitOfWork};
