//! Workflow registry: validated CRUD and lifecycle control over the
//! workflows table.
//!
//! The registry is the only writer of workflow rows. Every mutation either
//! fully applies or leaves the stored row untouched.

use std::sync::Arc;

use db::models::{LifecycleState, WorkflowRow};
use db::repository::workflows as wf_repo;
use db::DbPool;
use steps::StepRegistry;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{DefinitionBody, NewWorkflow, WorkflowDefinition, WorkflowPatch};
use crate::validate::validate_definition;
use crate::EngineError;

#[derive(Clone)]
pub struct WorkflowRegistry {
    pool: DbPool,
    steps: Arc<StepRegistry>,
}

impl WorkflowRegistry {
    pub fn new(pool: DbPool, steps: Arc<StepRegistry>) -> Self {
        Self { pool, steps }
    }

    /// The step registry definitions are validated against.
    pub fn steps(&self) -> &StepRegistry {
        &self.steps
    }

    /// Validate and store a new workflow in the `Active` state.
    ///
    /// # Errors
    /// [`EngineError::InvalidDefinition`] if validation fails; nothing is
    /// stored in that case.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn register(&self, new: NewWorkflow) -> Result<WorkflowDefinition, EngineError> {
        validate_definition(&new.name, &new.trigger, &new.steps, &self.steps)?;

        let body = DefinitionBody {
            trigger: new.trigger,
            steps: new.steps,
        };
        let row = wf_repo::create_workflow(&self.pool, &new.name, serde_json::to_value(&body)?);
        info!(workflow_id = %row.id, "workflow registered");
        WorkflowDefinition::try_from(row)
    }

    /// Merge `patch` into the stored workflow.
    ///
    /// Lifecycle state only changes when the patch names one.
    #[instrument(skip(self, patch))]
    pub fn update(&self, id: Uuid, patch: WorkflowPatch) -> Result<WorkflowDefinition, EngineError> {
        let row = wf_repo::update_workflow(&self.pool, id, |row: &mut WorkflowRow| {
            let mut body: DefinitionBody = serde_json::from_value(row.definition.clone())?;
            if let Some(name) = patch.name {
                row.name = name;
            }
            if let Some(trigger) = patch.trigger {
                body.trigger = trigger;
            }
            if let Some(steps) = patch.steps {
                body.steps = steps;
            }
            if let Some(state) = patch.lifecycle_state {
                row.lifecycle_state = state;
            }

            validate_definition(&row.name, &body.trigger, &body.steps, &self.steps)?;
            row.definition = serde_json::to_value(&body)?;
            Ok::<(), EngineError>(())
        })
        .map_err(|e| e.not_found_as(id))?;

        info!(workflow_id = %id, "workflow updated");
        WorkflowDefinition::try_from(row)
    }

    /// Remove a workflow from future scheduling.
    ///
    /// Execution records for the workflow are kept. An in-flight run is not
    /// interrupted; it works from the snapshot it was submitted with.
    #[instrument(skip(self))]
    pub fn unregister(&self, id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        let row = wf_repo::delete_workflow(&self.pool, id).map_err(|_| EngineError::NotFound(id))?;
        info!(workflow_id = %id, "workflow unregistered");
        WorkflowDefinition::try_from(row)
    }

    pub fn get(&self, id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        let row = wf_repo::get_workflow(&self.pool, id).map_err(|_| EngineError::NotFound(id))?;
        WorkflowDefinition::try_from(row)
    }

    /// Current lifecycle state of one workflow, read without decoding its
    /// definition.
    pub fn lifecycle_state(&self, id: Uuid) -> Result<LifecycleState, EngineError> {
        wf_repo::get_workflow(&self.pool, id)
            .map(|row| row.lifecycle_state)
            .map_err(|_| EngineError::NotFound(id))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        wf_repo::workflow_exists(&self.pool, id)
    }

    /// All workflows, oldest first.
    pub fn list(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        wf_repo::list_workflows(&self.pool)
            .into_iter()
            .map(WorkflowDefinition::try_from)
            .collect()
    }

    /// Toggle one workflow between `Active` and `Paused`.
    ///
    /// A `Disabled` workflow is returned unchanged; only an explicit
    /// `update` moves it out of that state.
    #[instrument(skip(self))]
    pub fn set_paused(&self, id: Uuid, paused: bool) -> Result<WorkflowDefinition, EngineError> {
        let (from, to) = if paused {
            (LifecycleState::Active, LifecycleState::Paused)
        } else {
            (LifecycleState::Paused, LifecycleState::Active)
        };

        let row = wf_repo::update_workflow(&self.pool, id, |row: &mut WorkflowRow| {
            if row.lifecycle_state == from {
                row.lifecycle_state = to;
            }
            Ok::<(), EngineError>(())
        })
        .map_err(|e| e.not_found_as(id))?;

        info!(workflow_id = %id, state = %row.lifecycle_state, "workflow lifecycle set");
        WorkflowDefinition::try_from(row)
    }

    /// Pause every `Active` workflow. Returns how many changed.
    pub fn pause_all(&self) -> usize {
        let changed =
            wf_repo::set_lifecycle_states(&self.pool, LifecycleState::Active, LifecycleState::Paused);
        info!(changed, "paused all workflows");
        changed
    }

    /// Resume every `Paused` workflow. Returns how many changed.
    pub fn resume_all(&self) -> usize {
        let changed =
            wf_repo::set_lifecycle_states(&self.pool, LifecycleState::Paused, LifecycleState::Active);
        info!(changed, "resumed all workflows");
        changed
    }
}
