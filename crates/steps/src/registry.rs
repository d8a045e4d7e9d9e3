//! Step registry: maps `step_type` strings to step implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::Step;

/// Registry of step implementations keyed by `step_type`.
///
/// Built once at startup and shared read-only by the engine.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the implementation for `step_type`.
    pub fn register(&mut self, step_type: impl Into<String>, step: Arc<dyn Step>) -> &mut Self {
        self.steps.insert(step_type.into(), step);
        self
    }

    /// Builder-style variant of [`StepRegistry::register`].
    pub fn with(mut self, step_type: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.register(step_type, step);
        self
    }

    pub fn get(&self, step_type: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(step_type).cloned()
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.steps.contains_key(step_type)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All registered step types, sorted.
    pub fn step_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.steps.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}
