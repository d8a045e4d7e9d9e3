//! Step-level error type.

use thiserror::Error;

/// Errors returned by a step's `execute` method.
///
/// The executor uses the variant to decide retry behaviour:
/// - `Retryable`: the step is re-attempted with exponential back-off.
/// - `Fatal`: the execution is immediately marked as failed.
/// - `Cancelled`: the step observed the cancellation token and unwound.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Transient failure; the executor should re-try the step.
    #[error("retryable step error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal step error: {0}")]
    Fatal(String),

    /// The step stopped early because cancellation was requested.
    #[error("step cancelled")]
    Cancelled,
}

impl StepError {
    /// The bare message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) => msg,
            Self::Cancelled => "cancelled",
        }
    }
}
