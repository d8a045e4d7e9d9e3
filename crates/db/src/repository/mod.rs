//! Repository functions: one function per storage operation.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`
//! (or a plain value when the operation cannot fail). No business logic,
//! no domain types beyond the row structs.

pub mod executions;
pub mod workflows;
