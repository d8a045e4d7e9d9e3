//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::validate::ValidationError;

/// Errors produced by the workflow engine (validation, control, execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation and lookup errors ------

    /// The definition failed validation; nothing was stored.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(#[from] ValidationError),

    /// No workflow (or execution) with this id.
    #[error("not found: {0}")]
    NotFound(Uuid),

    // ------ Dispatch errors ------

    /// Another execution of this workflow is still in flight.
    #[error("workflow {0} is already running")]
    AlreadyRunning(Uuid),

    /// The workflow is not Active (paused or disabled).
    #[error("workflow {0} is not active")]
    WorkflowPaused(Uuid),

    /// Emergency stop is in effect; no dispatch until `resume`.
    #[error("engine is halted")]
    EngineHalted,

    // ------ Execution errors ------

    /// A step failed; the execution was aborted.
    #[error("step '{step}' failed: {message}")]
    StepExecutionFailed { step: String, message: String },

    /// The execution was cancelled by an emergency stop.
    #[error("execution cancelled")]
    Cancelled,

    /// The background execution task ended without reporting.
    #[error("execution task aborted: {0}")]
    TaskAborted(String),

    // ------ Storage errors ------

    /// Persistence error from the db crate.
    #[error("storage error: {0}")]
    Storage(#[from] db::DbError),

    /// A stored definition could not be (de)serialised.
    #[error("definition serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Swap a bare storage `NotFound` for a `NotFound` naming `id`.
    pub(crate) fn not_found_as(self, id: Uuid) -> Self {
        match self {
            Self::Storage(db::DbError::NotFound) => Self::NotFound(id),
            other => other,
        }
    }
}
