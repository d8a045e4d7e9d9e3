//! In-process storage pool.
//!
//! The pool owns both tables behind `parking_lot` locks. Repository
//! functions never hold a lock across an `.await`; every read-modify-write
//! happens inside a single write guard, which makes each row update
//! linearizable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{ExecutionRecord, WorkflowRow};

/// Shared handle used across the whole application.
pub type DbPool = Arc<MemoryDb>;

/// Execution records in creation order with an id index.
#[derive(Debug, Default)]
pub(crate) struct ExecutionTable {
    pub(crate) rows: Vec<ExecutionRecord>,
    pub(crate) index: HashMap<Uuid, usize>,
}

/// Backing storage for a [`DbPool`].
#[derive(Debug, Default)]
pub struct MemoryDb {
    pub(crate) workflows: RwLock<HashMap<Uuid, WorkflowRow>>,
    pub(crate) executions: RwLock<ExecutionTable>,
    seq: AtomicU64,
}

impl MemoryDb {
    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Create a new, empty pool.
pub fn create_pool() -> DbPool {
    info!("Creating in-memory storage pool");
    Arc::new(MemoryDb::default())
}
