//! The `Step` trait: the contract every step must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::StepError;

/// Shared context passed to every step during execution.
///
/// Defined here (in the steps crate) so both the engine and individual step
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// Name of the step within the workflow definition.
    pub step_name: String,
    /// Configuration attached to the step definition.
    pub config: Value,
    /// Attempt number for this step (1-based).
    pub attempt: u32,
    cancellation: CancellationToken,
}

impl StepContext {
    pub fn new(
        workflow_id: Uuid,
        execution_id: Uuid,
        step_name: impl Into<String>,
        config: Value,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            workflow_id,
            execution_id,
            step_name: step_name.into(),
            config,
            attempt: 1,
            cancellation,
        }
    }

    /// Same context, next attempt.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    ///
    /// Long-running steps should race their work against this in a
    /// `tokio::select!` so an emergency stop unwinds them promptly.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

/// The core step trait.
///
/// Steps are opaque to the engine: it only sequences them and stops at the
/// first error. Side effects are the step's responsibility to make
/// idempotent or compensable.
#[async_trait]
pub trait Step: Send + Sync {
    /// Execute the step, receive the *previous* step's JSON output as
    /// `input`, and return this step's JSON output.
    async fn execute(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError>;
}
