//! Unit of Work
//!
//! Repositories never write directly. Writes are staged on a [`ChangeSet`]
//! together with the domain events they produce, and a [`UnitOfWork`] commits
//! the whole set atomically: entity rows, one audit row per event, all or
//! nothing.
//!
//! After a durable commit the change set's after-commit hooks run (cache
//! invalidation), then events are dispatched. A change set that is dropped or
//! rolled back runs nothing.
//!
//! # Optimistic concurrency
//!
//! Each staged update carries the row version it was read at. At commit time:
//! - an insert whose id already exists is ignored,
//! - an update or delete of a row that no longer exists is discarded,
//! - a version mismatch is resolved by the [`ConflictPolicy`]. Under
//!   `RefreshAndRetry` the expected version is re-baselined on the stored one
//!   and the commit retried once, so the later writer wins. Under `Reject` the
//!   commit fails with [`AccessError::Concurrency`].

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::domain_event::{AccessEvent, EventEnvelope};
use super::execution_context::ExecutionContext;
use crate::shared::entity::Entity;
use crate::shared::error::{AccessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Last writer wins after refreshing the baseline version (one retry).
    #[default]
    RefreshAndRetry,
    /// Surface the conflict to the caller.
    Reject,
}

impl From<gk_config::ConflictPolicySetting> for ConflictPolicy {
    fn from(setting: gk_config::ConflictPolicySetting) -> Self {
        match setting {
            gk_config::ConflictPolicySetting::RefreshAndRetry => ConflictPolicy::RefreshAndRetry,
            gk_config::ConflictPolicySetting::Reject => ConflictPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    HardDelete,
}

/// One row mutation waiting for commit.
#[derive(Debug, Clone)]
pub struct StagedChange {
    pub table: &'static str,
    pub id: String,
    pub op: ChangeOp,
    /// Serialized row; `None` for hard deletes
    pub data: Option<serde_json::Value>,
    /// Row version the change was based on (0 for inserts)
    pub expected_version: u64,
    pub deleted: bool,
    pub unique_keys: Vec<(String, String)>,
}

pub type CommitHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Staged writes, events and after-commit hooks of one unit of work.
pub struct ChangeSet {
    context: ExecutionContext,
    policy: ConflictPolicy,
    changes: Vec<StagedChange>,
    events: Vec<EventEnvelope>,
    after_commit: Vec<CommitHook>,
}

/// A change set taken apart by a [`UnitOfWork`] implementation.
pub struct ChangeSetParts {
    pub context: ExecutionContext,
    pub policy: ConflictPolicy,
    pub changes: Vec<StagedChange>,
    pub events: Vec<EventEnvelope>,
    pub after_commit: Vec<CommitHook>,
}

impl ChangeSet {
    pub fn new(context: ExecutionContext, policy: ConflictPolicy) -> Self {
        Self {
            context,
            policy,
            changes: Vec::new(),
            events: Vec::new(),
            after_commit: Vec::new(),
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn changes(&self) -> &[StagedChange] {
        &self.changes
    }

    pub fn events(&self) -> &[EventEnvelope] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.events.is_empty()
    }

    pub fn stage_insert<T: Entity>(&mut self, entity: &T) -> Result<()> {
        let mut row = entity.clone();
        if row.meta().created_by.is_none() {
            row.meta_mut().created_by = Some(self.context.principal_id.clone());
        }
        self.push(Self::staged(&row, ChangeOp::Insert, 0)?);
        Ok(())
    }

    pub fn stage_update<T: Entity>(&mut self, entity: &T) -> Result<()> {
        let mut row = entity.clone();
        row.meta_mut().updated_by = Some(self.context.principal_id.clone());
        let expected = row.meta().version;
        self.push(Self::staged(&row, ChangeOp::Update, expected)?);
        Ok(())
    }

    pub fn stage_hard_delete<T: Entity>(&mut self, entity: &T) {
        self.push(StagedChange {
            table: T::table_name(),
            id: entity.id().to_string(),
            op: ChangeOp::HardDelete,
            data: None,
            expected_version: entity.meta().version,
            deleted: true,
            unique_keys: Vec::new(),
        });
    }

    pub fn record(&mut self, event: AccessEvent) {
        self.events.push(EventEnvelope::new(&self.context, event));
    }

    pub fn record_all(&mut self, events: impl IntoIterator<Item = AccessEvent>) {
        for event in events {
            self.record(event);
        }
    }

    /// Register work to run once the commit is durable.
    pub fn after_commit<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after_commit.push(Box::new(move || Box::pin(hook())));
    }

    /// Discard everything staged. Hooks do not run.
    pub fn rollback(self) {
        debug!(
            execution_id = %self.context.execution_id,
            changes = self.changes.len(),
            events = self.events.len(),
            "Change set rolled back"
        );
    }

    pub fn into_parts(self) -> ChangeSetParts {
        ChangeSetParts {
            context: self.context,
            policy: self.policy,
            changes: self.changes,
            events: self.events,
            after_commit: self.after_commit,
        }
    }

    fn staged<T: Entity>(row: &T, op: ChangeOp, expected_version: u64) -> Result<StagedChange> {
        Ok(StagedChange {
            table: T::table_name(),
            id: row.id().to_string(),
            op,
            data: Some(serde_json::to_value(row)?),
            expected_version,
            deleted: row.is_deleted(),
            unique_keys: row
                .unique_keys()
                .into_iter()
                .map(|(index, value)| (index.to_string(), value))
                .collect(),
        })
    }

    /// A row staged twice collapses into one change: the first change's op
    /// and expected version, the latest data.
    fn push(&mut self, change: StagedChange) {
        let Some(pos) = self
            .changes
            .iter()
            .position(|c| c.table == change.table && c.id == change.id)
        else {
            self.changes.push(change);
            return;
        };

        let prev = &mut self.changes[pos];
        match (prev.op, change.op) {
            (ChangeOp::Insert, ChangeOp::HardDelete) => {
                self.changes.remove(pos);
            }
            (_, ChangeOp::HardDelete) => {
                prev.op = ChangeOp::HardDelete;
                prev.data = None;
                prev.deleted = true;
                prev.unique_keys.clear();
            }
            _ => {
                prev.data = change.data;
                prev.deleted = change.deleted;
                prev.unique_keys = change.unique_keys;
            }
        }
    }
}

/// Transaction boundary over the persistence collaborator.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Start a change set using the store's default conflict policy.
    fn begin(&self, ctx: ExecutionContext) -> ChangeSet;

    /// Commit atomically. Returns the number of entity rows written
    /// (audit rows excluded).
    async fn save_changes(&self, changes: ChangeSet) -> Result<usize>;
}

/// Run after-commit hooks on a detached task and wait for it.
///
/// The task keeps running if the caller's future is dropped, so a committed
/// write is never left without its cache invalidation.
pub async fn run_after_commit(hooks: Vec<CommitHook>) {
    if hooks.is_empty() {
        return;
    }
    let task = tokio::spawn(async move {
        for hook in hooks {
            hook().await;
        }
    });
    if let Err(e) = task.await {
        warn!(error = %e, "After-commit hooks did not complete");
    }
}

pub(crate) fn concurrency_error(change: &StagedChange) -> AccessError {
    AccessError::Concurrency {
        table: change.table.to_string(),
        id: change.id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Permission;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn permission() -> Permission {
        Permission::new("Order", "Read", None).unwrap()
    }

    #[test]
    fn test_stage_insert_stamps_creator() {
        let mut changes = ChangeSet::new(ExecutionContext::create("admin-1"), ConflictPolicy::default());
        changes.stage_insert(&permission()).unwrap();

        let staged = &changes.changes()[0];
        assert_eq!(staged.op, ChangeOp::Insert);
        assert_eq!(staged.table, "permissions");
        let data = staged.data.as_ref().unwrap();
        assert_eq!(data["meta"]["createdBy"], "admin-1");
        assert!(staged
            .unique_keys
            .contains(&("name".to_string(), "order.read".to_string())));
    }

    #[test]
    fn test_insert_then_update_collapses_to_insert() {
        let mut changes = ChangeSet::new(ExecutionContext::system(), ConflictPolicy::default());
        let mut perm = permission();
        changes.stage_insert(&perm).unwrap();
        perm.describe("Read orders");
        changes.stage_update(&perm).unwrap();

        assert_eq!(changes.changes().len(), 1);
        assert_eq!(changes.changes()[0].op, ChangeOp::Insert);
        assert_eq!(
            changes.changes()[0].data.as_ref().unwrap()["description"],
            "Read orders"
        );
    }

    #[test]
    fn test_insert_then_hard_delete_cancels_out() {
        let mut changes = ChangeSet::new(ExecutionContext::system(), ConflictPolicy::default());
        let perm = permission();
        changes.stage_insert(&perm).unwrap();
        changes.stage_hard_delete(&perm);
        assert!(changes.changes().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_skips_hooks() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut changes = ChangeSet::new(ExecutionContext::system(), ConflictPolicy::default());
        let flag = ran.clone();
        changes.after_commit(move || async move { flag.store(true, Ordering::SeqCst) });
        changes.rollback();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_after_commit_runs_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut changes = ChangeSet::new(ExecutionContext::system(), ConflictPolicy::default());
        for i in 0..3 {
            let order = order.clone();
            changes.after_commit(move || async move { order.lock().push(i) });
        }
        run_after_commit(changes.into_parts().after_commit).await;
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
