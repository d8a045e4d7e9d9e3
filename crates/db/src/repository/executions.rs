//! Execution record repository functions.
//!
//! Records are append/update-only: there is no delete. Status changes go
//! through [`transition_execution`], a compare-and-set on the current
//! status, so two writers can never both move the same record.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    models::{ExecutionRecord, ExecutionStatus, ExecutionTransition, TriggerSource},
    DbError, DbPool,
};

/// Create a new execution record in `queued` status.
pub fn create_execution(
    pool: &DbPool,
    workflow_id: Uuid,
    trigger_source: TriggerSource,
) -> ExecutionRecord {
    let mut table = pool.executions.write();
    // Sequence is taken under the table lock so `rows` stays sorted by seq.
    let record = ExecutionRecord {
        id: Uuid::now_v7(),
        seq: pool.next_seq(),
        workflow_id,
        trigger_source,
        status: ExecutionStatus::Queued,
        queued_at: Utc::now(),
        started_at: None,
        completed_at: None,
        error: None,
        steps_completed: 0,
        duration_ms: None,
    };

    let position = table.rows.len();
    table.index.insert(record.id, position);
    table.rows.push(record.clone());
    record
}

/// Fetch a single execution record.
pub fn get_execution(pool: &DbPool, execution_id: Uuid) -> Result<ExecutionRecord, DbError> {
    let table = pool.executions.read();
    table
        .index
        .get(&execution_id)
        .map(|&i| table.rows[i].clone())
        .ok_or(DbError::NotFound)
}

/// Move a record from `expected` to `transition.to`.
///
/// Fails with [`DbError::Conflict`] if the stored status is not `expected`
/// and with [`DbError::InvalidTransition`] if the move is not forward.
/// `started_at` is stamped on entry to `running`; `completed_at` and
/// `duration_ms` on entry to any terminal status.
pub fn transition_execution(
    pool: &DbPool,
    execution_id: Uuid,
    expected: ExecutionStatus,
    transition: ExecutionTransition,
) -> Result<ExecutionRecord, DbError> {
    if !expected.can_transition_to(transition.to) {
        return Err(DbError::InvalidTransition {
            from: expected,
            to: transition.to,
        });
    }

    let mut table = pool.executions.write();
    let position = *table.index.get(&execution_id).ok_or(DbError::NotFound)?;
    let record = &mut table.rows[position];

    if record.status != expected {
        return Err(DbError::Conflict {
            id: execution_id,
            expected,
            actual: record.status,
        });
    }

    record.status = transition.to;
    if let Some(steps) = transition.steps_completed {
        record.steps_completed = steps;
    }

    if transition.to == ExecutionStatus::Running {
        record.started_at = Some(transition.at);
    } else {
        let started = record.started_at.unwrap_or(transition.at);
        let completed = transition.at.max(started);
        record.completed_at = Some(completed);
        record.duration_ms = Some((completed - started).num_milliseconds());
        if transition.to == ExecutionStatus::Failed {
            record.error = transition.error;
        }
    }

    Ok(record.clone())
}

/// Most-recent-first listing, optionally restricted to one workflow.
///
/// Returns at most `limit` records.
pub fn list_executions(
    pool: &DbPool,
    workflow_id: Option<Uuid>,
    limit: usize,
) -> Vec<ExecutionRecord> {
    let table = pool.executions.read();
    table
        .rows
        .iter()
        .rev()
        .filter(|r| workflow_id.map_or(true, |id| r.workflow_id == id))
        .take(limit)
        .cloned()
        .collect()
}

/// Every record for one workflow, oldest first.
pub fn executions_for_workflow(pool: &DbPool, workflow_id: Uuid) -> Vec<ExecutionRecord> {
    let table = pool.executions.read();
    table
        .rows
        .iter()
        .filter(|r| r.workflow_id == workflow_id)
        .cloned()
        .collect()
}

/// Every record whose `started_at` lies in `[from, to]`, oldest first.
pub fn executions_started_between(
    pool: &DbPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<ExecutionRecord> {
    let table = pool.executions.read();
    table
        .rows
        .iter()
        .filter(|r| r.started_at.is_some_and(|t| t >= from && t <= to))
        .cloned()
        .collect()
}

/// Number of records for `workflow_id` currently in `status`.
pub fn count_with_status(pool: &DbPool, workflow_id: Uuid, status: ExecutionStatus) -> usize {
    pool.executions
        .read()
        .rows
        .iter()
        .filter(|r| r.workflow_id == workflow_id && r.status == status)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    #[test]
    fn lifecycle_stamps_timestamps() {
        let pool = create_pool();
        let wf = Uuid::now_v7();
        let rec = create_execution(&pool, wf, TriggerSource::Manual);
        assert_eq!(rec.status, ExecutionStatus::Queued);
        assert!(rec.started_at.is_none());

        let t0 = Utc::now();
        let running = transition_execution(
            &pool,
            rec.id,
            ExecutionStatus::Queued,
            ExecutionTransition::to(ExecutionStatus::Running, t0),
        )
        .unwrap();
        assert_eq!(running.started_at, Some(t0));

        let t1 = t0 + chrono::Duration::milliseconds(250);
        let done = transition_execution(
            &pool,
            rec.id,
            ExecutionStatus::Running,
            ExecutionTransition::to(ExecutionStatus::Failed, t1)
                .with_error("boom")
                .with_steps_completed(1),
        )
        .unwrap();
        assert_eq!(done.completed_at, Some(t1));
        assert_eq!(done.duration_ms, Some(250));
        assert_eq!(done.error.as_deref(), Some("boom"));
        assert_eq!(done.steps_completed, 1);
    }

    #[test]
    fn stale_expected_status_conflicts() {
        let pool = create_pool();
        let rec = create_execution(&pool, Uuid::now_v7(), TriggerSource::Scheduler);
        let now = Utc::now();

        transition_execution(
            &pool,
            rec.id,
            ExecutionStatus::Queued,
            ExecutionTransition::to(ExecutionStatus::Running, now),
        )
        .unwrap();

        let again = transition_execution(
            &pool,
            rec.id,
            ExecutionStatus::Queued,
            ExecutionTransition::to(ExecutionStatus::Running, now),
        );
        assert!(matches!(again, Err(DbError::Conflict { .. })));

        let backwards = transition_execution(
            &pool,
            rec.id,
            ExecutionStatus::Running,
            ExecutionTransition::to(ExecutionStatus::Queued, now),
        );
        assert!(matches!(backwards, Err(DbError::InvalidTransition { .. })));
    }

    #[test]
    fn list_is_most_recent_first_and_bounded() {
        let pool = create_pool();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let first = create_execution(&pool, a, TriggerSource::Manual);
        create_execution(&pool, b, TriggerSource::Manual);
        let third = create_execution(&pool, a, TriggerSource::Manual);

        let all = list_executions(&pool, None, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, third.id);

        let only_a = list_executions(&pool, Some(a), 10);
        assert_eq!(only_a.iter().map(|r| r.id).collect::<Vec<_>>(), vec![third.id, first.id]);

        assert!(list_executions(&pool, None, 0).is_empty());
        assert_eq!(list_executions(&pool, Some(a), 1).len(), 1);
    }
}
