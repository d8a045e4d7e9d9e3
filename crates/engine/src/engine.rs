//! `AutomationEngine`: the single entry point that wires the registry,
//! ledger, executor and scheduler over one storage pool.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::models::TriggerSource;
use db::DbPool;
use steps::StepRegistry;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::analytics::{aggregate, AnalyticsWindow, PerformanceReport};
use crate::config::EngineConfig;
use crate::executor::WorkflowExecutor;
use crate::ledger::ExecutionLedger;
use crate::models::{ExecutionRecord, NewWorkflow, WorkflowDefinition, WorkflowPatch, WorkflowStats};
use crate::registry::WorkflowRegistry;
use crate::scheduler::{Scheduler, SchedulerHandle, TickReport};
use crate::EngineError;

/// Snapshot of the global control flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ControlStatus {
    pub halted: bool,
    pub in_flight: usize,
}

pub struct AutomationEngine {
    config: EngineConfig,
    registry: WorkflowRegistry,
    ledger: ExecutionLedger,
    executor: WorkflowExecutor,
    scheduler: Arc<Scheduler>,
}

impl AutomationEngine {
    /// Build an engine over a fresh in-memory store.
    pub fn new(config: EngineConfig, steps: StepRegistry) -> Self {
        Self::with_pool(db::create_pool(), config, steps)
    }

    pub fn with_pool(pool: DbPool, config: EngineConfig, steps: StepRegistry) -> Self {
        let registry = WorkflowRegistry::new(pool.clone(), Arc::new(steps));
        let ledger = ExecutionLedger::new(pool);
        let executor = WorkflowExecutor::new(registry.clone(), ledger.clone(), config.clone());
        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            executor.clone(),
            config.tick_interval,
        ));

        Self {
            config,
            registry,
            ledger,
            executor,
            scheduler,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn step_types(&self) -> Vec<&str> {
        self.registry.steps().step_types()
    }

    // ------------------------------------------------------------------
    // Workflow management
    // ------------------------------------------------------------------

    pub fn register_workflow(&self, new: NewWorkflow) -> Result<WorkflowDefinition, EngineError> {
        self.registry.register(new)
    }

    pub fn update_workflow(&self, id: Uuid, patch: WorkflowPatch) -> Result<WorkflowDefinition, EngineError> {
        self.registry.update(id, patch)
    }

    pub fn unregister_workflow(&self, id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        self.registry.unregister(id)
    }

    pub fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        self.registry.list()
    }

    pub fn get_workflow(&self, id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        self.registry.get(id)
    }

    pub fn set_workflow_paused(&self, id: Uuid, paused: bool) -> Result<WorkflowDefinition, EngineError> {
        self.registry.set_paused(id, paused)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Start a run of `id` now, bypassing its trigger.
    ///
    /// Returns the `Queued` record; the run continues in the background.
    #[instrument(skip(self))]
    pub fn execute_workflow_now(&self, id: Uuid) -> Result<ExecutionRecord, EngineError> {
        let workflow = self.admit(id)?;
        let submission = self.executor.submit(&workflow, TriggerSource::Manual)?;
        Ok(submission.record)
    }

    /// Like [`execute_workflow_now`](Self::execute_workflow_now) but waits
    /// for the run to reach a terminal state.
    pub async fn execute_now_and_wait(&self, id: Uuid) -> Result<ExecutionRecord, EngineError> {
        let workflow = self.admit(id)?;
        self.executor.submit(&workflow, TriggerSource::Manual)?.wait().await
    }

    fn admit(&self, id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        if self.executor.is_halted() {
            return Err(EngineError::EngineHalted);
        }
        let workflow = self.registry.get(id)?;
        if !workflow.is_active() {
            return Err(EngineError::WorkflowPaused(id));
        }
        Ok(workflow)
    }

    // ------------------------------------------------------------------
    // Global controls
    // ------------------------------------------------------------------

    pub fn pause_all_workflows(&self) -> Result<usize, EngineError> {
        Ok(self.registry.pause_all())
    }

    pub fn resume_all_workflows(&self) -> Result<usize, EngineError> {
        Ok(self.registry.resume_all())
    }

    /// Halt all dispatch and cancel every in-flight run.
    ///
    /// Returns the number of runs signalled. Stays in effect until
    /// [`resume`](Self::resume).
    pub fn emergency_stop(&self) -> Result<usize, EngineError> {
        let signalled = self.executor.emergency_stop();
        warn!(signalled, "emergency stop requested");
        Ok(signalled)
    }

    /// Clear the halted flag. Per-workflow lifecycle states are untouched.
    pub fn resume(&self) -> Result<bool, EngineError> {
        Ok(self.executor.resume())
    }

    pub fn is_halted(&self) -> bool {
        self.executor.is_halted()
    }

    pub fn control_status(&self) -> ControlStatus {
        ControlStatus {
            halted: self.executor.is_halted(),
            in_flight: self.executor.in_flight_count(),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Most-recent-first history. `limit` defaults to the configured
    /// history limit.
    pub fn get_execution_history(
        &self,
        workflow_id: Option<Uuid>,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>, EngineError> {
        let limit = limit.unwrap_or(self.config.default_history_limit);
        Ok(self.ledger.history(workflow_id, limit))
    }

    pub fn get_execution(&self, execution_id: Uuid) -> Result<ExecutionRecord, EngineError> {
        self.ledger.get(execution_id)
    }

    pub fn get_workflow_stats(&self, workflow_id: Uuid) -> Result<WorkflowStats, EngineError> {
        self.ledger.stats_for(workflow_id, &self.registry)
    }

    pub fn get_performance_analytics(&self, window: AnalyticsWindow) -> Result<PerformanceReport, EngineError> {
        let now = Utc::now();
        let records = self.ledger.started_between(now - window.duration(), now);
        Ok(aggregate(&records, window, now))
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Spawn the scheduler loop. Must be called from within a Tokio runtime.
    pub fn start(&self) -> SchedulerHandle {
        info!(
            tick_interval = ?self.config.tick_interval,
            max_concurrent_executions = self.config.max_concurrent_executions,
            "starting automation engine"
        );
        self.scheduler.clone().spawn()
    }

    /// Run a single scheduler tick against `now`.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        self.scheduler.tick(now)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
