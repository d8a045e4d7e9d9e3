pub mod analytics;
pub mod control;
pub mod executions;
pub mod workflows;
