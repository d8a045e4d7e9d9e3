//! Typed error type for the db crate.

use thiserror::Error;
use uuid::Uuid;

use crate::models::ExecutionStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("row not found")]
    NotFound,

    /// The stored status no longer matches what the caller expected.
    #[error("execution {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: ExecutionStatus,
        actual: ExecutionStatus,
    },

    /// The requested status change would move the record backwards.
    #[error("illegal execution transition {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}
