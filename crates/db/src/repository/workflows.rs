//! Workflow CRUD operations.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    models::{LifecycleState, WorkflowRow},
    DbError, DbPool,
};

/// Insert a new workflow in the `Active` state.
///
/// `definition` must be a JSON object produced by serialising the domain
/// definition type from the `engine` crate.
pub fn create_workflow(pool: &DbPool, name: &str, definition: serde_json::Value) -> WorkflowRow {
    let now = Utc::now();
    let row = WorkflowRow {
        id: Uuid::now_v7(),
        seq: pool.next_seq(),
        name: name.to_owned(),
        definition,
        lifecycle_state: LifecycleState::Active,
        created_at: now,
        updated_at: now,
    };

    pool.workflows.write().insert(row.id, row.clone());
    row
}

/// Fetch a single workflow by its primary key.
pub fn get_workflow(pool: &DbPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    pool.workflows.read().get(&id).cloned().ok_or(DbError::NotFound)
}

/// Whether a workflow row exists.
pub fn workflow_exists(pool: &DbPool, id: Uuid) -> bool {
    pool.workflows.read().contains_key(&id)
}

/// Return all workflows ordered by creation time (oldest first, stable).
pub fn list_workflows(pool: &DbPool) -> Vec<WorkflowRow> {
    let mut rows: Vec<WorkflowRow> = pool.workflows.read().values().cloned().collect();
    rows.sort_by_key(|r| (r.created_at, r.seq));
    rows
}

/// Atomically read-modify-write one workflow row.
///
/// `apply` runs against a copy of the row while the table is write-locked;
/// the copy replaces the stored row only if `apply` succeeds, so a failed
/// update leaves the row untouched. `updated_at` is bumped only when the
/// name, definition or lifecycle state actually changed; a no-op update
/// returns the stored row as is.
pub fn update_workflow<F, E>(pool: &DbPool, id: Uuid, apply: F) -> Result<WorkflowRow, E>
where
    F: FnOnce(&mut WorkflowRow) -> Result<(), E>,
    E: From<DbError>,
{
    let mut table = pool.workflows.write();
    let stored = table.get_mut(&id).ok_or(DbError::NotFound)?;

    let mut draft = stored.clone();
    apply(&mut draft)?;

    let changed = draft.name != stored.name
        || draft.definition != stored.definition
        || draft.lifecycle_state != stored.lifecycle_state;
    if !changed {
        return Ok(stored.clone());
    }

    draft.id = stored.id;
    draft.seq = stored.seq;
    draft.created_at = stored.created_at;
    draft.updated_at = Utc::now().max(stored.updated_at);

    *stored = draft.clone();
    Ok(draft)
}

/// Move every workflow in state `from` to state `to`.
///
/// Returns the number of rows changed.
pub fn set_lifecycle_states(pool: &DbPool, from: LifecycleState, to: LifecycleState) -> usize {
    let now = Utc::now();
    let mut changed = 0;
    for row in pool.workflows.write().values_mut() {
        if row.lifecycle_state == from {
            row.lifecycle_state = to;
            row.updated_at = now.max(row.updated_at);
            changed += 1;
        }
    }
    changed
}

/// Permanently delete a workflow by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub fn delete_workflow(pool: &DbPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    pool.workflows.write().remove(&id).ok_or(DbError::NotFound)
}
