//! In-memory persistence
//!
//! Reference implementation of the persistence collaborator: JSON rows in
//! per-table maps behind one `parking_lot::RwLock`. Commits validate and apply
//! a whole change set while holding the write lock, and nothing is awaited
//! while a guard is alive.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use super::repository::{Predicate, Repository};
use crate::audit::AuditLog;
use crate::shared::entity::Entity;
use crate::shared::error::{AccessError, Result};
use crate::usecase::domain_event::EventDispatcher;
use crate::usecase::execution_context::ExecutionContext;
use crate::usecase::unit_of_work::{
    concurrency_error, run_after_commit, ChangeOp, ChangeSet, ConflictPolicy, StagedChange,
    UnitOfWork,
};

#[derive(Debug, Clone)]
struct StoredRow {
    version: u64,
    deleted: bool,
    unique_keys: Vec<(String, String)>,
    data: serde_json::Value,
}

/// Keyed by TSID, so iteration order is creation order.
type Table = BTreeMap<String, StoredRow>;

/// What a commit did with each staged change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub written: usize,
    pub ignored_inserts: usize,
    pub discarded: usize,
    pub retried: bool,
}

#[derive(Default)]
pub struct InMemoryDatabase {
    tables: RwLock<HashMap<&'static str, Table>>,
    read_only: AtomicBool,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every commit fail, as during a primary failover.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    pub fn get<T: Entity>(&self, id: &str, include_deleted: bool) -> Result<Option<T>> {
        let tables = self.tables.read();
        let Some(row) = tables.get(T::table_name()).and_then(|t| t.get(id)) else {
            return Ok(None);
        };
        if row.deleted && !include_deleted {
            return Ok(None);
        }
        Self::decode(row).map(Some)
    }

    pub fn scan<T: Entity>(&self, predicate: Predicate<'_, T>, include_deleted: bool) -> Result<Vec<T>> {
        let tables = self.tables.read();
        let Some(table) = tables.get(T::table_name()) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for row in table.values() {
            if row.deleted && !include_deleted {
                continue;
            }
            let entity: T = Self::decode(row)?;
            if predicate(&entity) {
                found.push(entity);
            }
        }
        Ok(found)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.len())
    }

    /// Apply a change set atomically.
    pub fn commit(&self, changes: &[StagedChange], policy: ConflictPolicy) -> Result<CommitOutcome> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(AccessError::persistence("database is read-only"));
        }

        let mut tables = self.tables.write();
        let mut pending = changes.to_vec();
        let mut outcome = CommitOutcome::default();

        let writes = loop {
            let mut writes = Vec::with_capacity(pending.len());
            let mut conflicts = Vec::new();
            let mut ignored = 0;
            let mut discarded = 0;

            for (idx, change) in pending.iter().enumerate() {
                let stored = tables.get(change.table).and_then(|t| t.get(&change.id));
                match (change.op, stored) {
                    (ChangeOp::Insert, Some(_)) => {
                        debug!(table = change.table, id = %change.id, "Insert conflicts with an existing row, ignoring");
                        ignored += 1;
                    }
                    (ChangeOp::Insert, None) => writes.push(idx),
                    (_, None) => {
                        debug!(table = change.table, id = %change.id, "Row no longer exists, discarding local change");
                        discarded += 1;
                    }
                    (_, Some(row)) if row.version == change.expected_version => writes.push(idx),
                    (_, Some(row)) => conflicts.push((idx, row.version)),
                }
            }

            if conflicts.is_empty() {
                outcome.ignored_inserts = ignored;
                outcome.discarded = discarded;
                break writes;
            }

            if policy == ConflictPolicy::Reject || outcome.retried {
                let (idx, _) = conflicts[0];
                warn!(
                    table = pending[idx].table,
                    id = %pending[idx].id,
                    ?policy,
                    "Optimistic concurrency conflict, commit rejected"
                );
                return Err(concurrency_error(&pending[idx]));
            }

            for (idx, current) in conflicts {
                let change = &mut pending[idx];
                warn!(
                    table = change.table,
                    id = %change.id,
                    expected = change.expected_version,
                    current,
                    "Optimistic concurrency conflict, refreshing baseline and retrying"
                );
                change.expected_version = current;
            }
            outcome.retried = true;
        };

        let mut touched: HashMap<&'static str, Table> = HashMap::new();
        for &idx in &writes {
            let change = &pending[idx];
            let table = touched
                .entry(change.table)
                .or_insert_with(|| tables.get(change.table).cloned().unwrap_or_default());

            match (change.op, &change.data) {
                (ChangeOp::HardDelete, _) => {
                    table.remove(&change.id);
                }
                (op, Some(data)) => {
                    let version = match op {
                        ChangeOp::Insert => 1,
                        _ => change.expected_version + 1,
                    };
                    table.insert(
                        change.id.clone(),
                        StoredRow {
                            version,
                            deleted: change.deleted,
                            unique_keys: change.unique_keys.clone(),
                            data: data.clone(),
                        },
                    );
                }
                (_, None) => {
                    error!(table = change.table, id = %change.id, "Staged write without row data");
                    return Err(AccessError::internal("staged write without row data"));
                }
            }
        }

        for &idx in &writes {
            let change = &pending[idx];
            if change.op == ChangeOp::HardDelete || change.deleted {
                continue;
            }
            let table = &touched[change.table];
            for (index, value) in &change.unique_keys {
                let clash = table.iter().any(|(id, row)| {
                    id != &change.id
                        && !row.deleted
                        && row.unique_keys.iter().any(|(i, v)| i == index && v == value)
                });
                if clash {
                    return Err(AccessError::conflict(
                        "UNIQUE_VIOLATION",
                        format!("{}.{} '{}' already exists", change.table, index, value),
                    ));
                }
            }
        }

        tables.extend(touched);
        outcome.written = writes.len();
        Ok(outcome)
    }

    fn decode<T: Entity>(row: &StoredRow) -> Result<T> {
        let mut entity: T = serde_json::from_value(row.data.clone())?;
        entity.meta_mut().version = row.version;
        Ok(entity)
    }
}

/// Generic repository over [`InMemoryDatabase`].
pub struct InMemoryRepository<T> {
    db: Arc<InMemoryDatabase>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> InMemoryRepository<T> {
    pub fn new(db: Arc<InMemoryDatabase>) -> Self {
        Self {
            db,
            _marker: PhantomData,
        }
    }

    pub fn database(&self) -> &Arc<InMemoryDatabase> {
        &self.db
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn get(&self, id: &str, include_deleted: bool) -> Result<Option<T>> {
        self.db.get(id, include_deleted)
    }

    async fn list(&self, predicate: Predicate<'_, T>, include_deleted: bool) -> Result<Vec<T>> {
        self.db.scan(predicate, include_deleted)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.db.get::<T>(id, false)?.is_some())
    }

    async fn insert(&self, entity: &T, changes: &mut ChangeSet) -> Result<()> {
        changes.stage_insert(entity)
    }

    async fn update(&self, entity: &T, changes: &mut ChangeSet) -> Result<()> {
        changes.stage_update(entity)
    }

    async fn delete(&self, entity: &T, changes: &mut ChangeSet) -> Result<()> {
        let mut row = entity.clone();
        row.meta_mut().mark_deleted();
        changes.stage_update(&row)
    }

    async fn hard_delete(&self, entity: &T, changes: &mut ChangeSet) -> Result<()> {
        changes.stage_hard_delete(entity);
        Ok(())
    }
}

/// Unit of work over [`InMemoryDatabase`].
pub struct InMemoryUnitOfWork {
    db: Arc<InMemoryDatabase>,
    dispatcher: Arc<EventDispatcher>,
    default_policy: ConflictPolicy,
}

impl InMemoryUnitOfWork {
    pub fn new(
        db: Arc<InMemoryDatabase>,
        dispatcher: Arc<EventDispatcher>,
        default_policy: ConflictPolicy,
    ) -> Self {
        Self {
            db,
            dispatcher,
            default_policy,
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn begin(&self, ctx: ExecutionContext) -> ChangeSet {
        ChangeSet::new(ctx, self.default_policy)
    }

    async fn save_changes(&self, changes: ChangeSet) -> Result<usize> {
        let parts = changes.into_parts();
        if parts.changes.is_empty() && parts.events.is_empty() {
            return Ok(0);
        }

        let mut rows = parts.changes;
        let entity_rows = rows.len();
        let mut audit = ChangeSet::new(parts.context.clone(), parts.policy);
        for envelope in &parts.events {
            audit.stage_insert(&AuditLog::from_envelope(envelope)?)?;
        }
        rows.extend(audit.into_parts().changes);

        let outcome = self.db.commit(&rows, parts.policy).map_err(|e| {
            error!(
                execution_id = %parts.context.execution_id,
                error = %e,
                "Commit failed"
            );
            e
        })?;

        let written = outcome.written.saturating_sub(rows.len() - entity_rows);
        debug!(
            execution_id = %parts.context.execution_id,
            written,
            events = parts.events.len(),
            ignored_inserts = outcome.ignored_inserts,
            discarded = outcome.discarded,
            retried = outcome.retried,
            "Committed change set"
        );

        run_after_commit(parts.after_commit).await;
        self.dispatcher.dispatch_all(&parts.events).await;

        Ok(written)
    }
}
