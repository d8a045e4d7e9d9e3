//! `db` crate — pure persistence layer.
//!
//! Provides an in-process storage pool, typed row structs, and repository
//! functions for the two tables the engine needs: workflows and execution
//! records. No business logic lives here; validation, scheduling and
//! statistics belong to the `engine` crate.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::DbError;
pub use pool::{create_pool, DbPool};
