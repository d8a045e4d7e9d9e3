//! Execution ledger: append/update-only view over execution records.

use chrono::{DateTime, Utc};
use db::models::{ExecutionTransition, TriggerSource};
use db::repository::executions as exec_repo;
use db::DbPool;
use uuid::Uuid;

use crate::models::{ExecutionRecord, ExecutionStatus, WorkflowStats};
use crate::registry::WorkflowRegistry;
use crate::EngineError;

#[derive(Clone)]
pub struct ExecutionLedger {
    pool: DbPool,
}

impl ExecutionLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a new `Queued` record.
    pub fn append(&self, workflow_id: Uuid, source: TriggerSource) -> ExecutionRecord {
        exec_repo::create_execution(&self.pool, workflow_id, source)
    }

    /// Atomically move a record from `expected` to the transition's target.
    pub fn transition(
        &self,
        execution_id: Uuid,
        expected: ExecutionStatus,
        transition: ExecutionTransition,
    ) -> Result<ExecutionRecord, EngineError> {
        exec_repo::transition_execution(&self.pool, execution_id, expected, transition)
            .map_err(|e| EngineError::from(e).not_found_as(execution_id))
    }

    pub fn get(&self, execution_id: Uuid) -> Result<ExecutionRecord, EngineError> {
        exec_repo::get_execution(&self.pool, execution_id)
            .map_err(|_| EngineError::NotFound(execution_id))
    }

    /// Most-recent-first history, at most `limit` records.
    ///
    /// Running entries are provisional; they may complete right after the
    /// snapshot is taken.
    pub fn history(&self, workflow_id: Option<Uuid>, limit: usize) -> Vec<ExecutionRecord> {
        exec_repo::list_executions(&self.pool, workflow_id, limit)
    }

    /// Statistics for one workflow.
    ///
    /// Records outlive their workflow, so an unregistered workflow with
    /// history still has stats. Only a workflow with no records that the
    /// registry has never heard of is `NotFound`.
    pub fn stats_for(
        &self,
        workflow_id: Uuid,
        registry: &WorkflowRegistry,
    ) -> Result<WorkflowStats, EngineError> {
        let records = exec_repo::executions_for_workflow(&self.pool, workflow_id);
        if records.is_empty() && !registry.contains(workflow_id) {
            return Err(EngineError::NotFound(workflow_id));
        }
        Ok(WorkflowStats::from_records(workflow_id, &records))
    }

    /// Records whose `started_at` lies in `[from, to]`.
    pub fn started_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<ExecutionRecord> {
        exec_repo::executions_started_between(&self.pool, from, to)
    }

    /// Number of `Running` records for one workflow.
    pub fn running_count(&self, workflow_id: Uuid) -> usize {
        exec_repo::count_with_status(&self.pool, workflow_id, ExecutionStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use steps::builtin::default_registry;

    #[test]
    fn stats_for_unknown_workflow_without_records_is_not_found() {
        let pool = db::create_pool();
        let ledger = ExecutionLedger::new(pool.clone());
        let registry = WorkflowRegistry::new(pool, Arc::new(default_registry()));
        let ghost = Uuid::now_v7();

        assert!(matches!(
            ledger.stats_for(ghost, &registry),
            Err(EngineError::NotFound(id)) if id == ghost
        ));
    }

    #[test]
    fn stats_survive_unregistration() {
        let pool = db::create_pool();
        let ledger = ExecutionLedger::new(pool.clone());
        let registry = WorkflowRegistry::new(pool, Arc::new(default_registry()));
        let orphan = Uuid::now_v7();

        let rec = ledger.append(orphan, TriggerSource::Manual);
        let now = Utc::now();
        ledger
            .transition(rec.id, ExecutionStatus::Queued, ExecutionTransition::to(ExecutionStatus::Running, now))
            .unwrap();
        ledger
            .transition(rec.id, ExecutionStatus::Running, ExecutionTransition::to(ExecutionStatus::Succeeded, now))
            .unwrap();

        let stats = ledger.stats_for(orphan, &registry).unwrap();
        assert_eq!(stats.total_runs, 1);
        assert_eq!(stats.success_count, 1);
    }

    #[test]
    fn transition_on_unknown_record_is_not_found() {
        let ledger = ExecutionLedger::new(db::create_pool());
        let ghost = Uuid::now_v7();
        let result = ledger.transition(
            ghost,
            ExecutionStatus::Queued,
            ExecutionTransition::to(ExecutionStatus::Running, Utc::now()),
        );
        assert!(matches!(result, Err(EngineError::NotFound(id)) if id == ghost));
    }
}
