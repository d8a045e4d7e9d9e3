//! `engine` crate — workflow registry, scheduler, executor, execution ledger
//! and analytics, fronted by [`AutomationEngine`].

pub mod analytics;
pub mod config;
pub mod cron;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod validate;

pub use analytics::{AnalyticsWindow, PerformanceReport};
pub use config::EngineConfig;
pub use engine::{AutomationEngine, ControlStatus};
pub use error::EngineError;
pub use executor::{Submission, WorkflowExecutor};
pub use models::{
    ExecutionRecord, ExecutionStatus, LifecycleState, NewWorkflow, StepDefinition, Trigger,
    TriggerSource, WorkflowDefinition, WorkflowPatch, WorkflowStats,
};
pub use scheduler::{Scheduler, SchedulerHandle, TickReport};
pub use validate::{validate_definition, ValidationError};

#[cfg(test)]
mod executor_tests;
