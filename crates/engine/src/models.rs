//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. The trigger and step list are serialised into the JSON
//! `definition` column of the workflows table; execution records are owned
//! by the persistence layer and re-exported here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use db::models::WorkflowRow;

pub use db::models::{ExecutionRecord, ExecutionStatus, LifecycleState, TriggerSource};

use crate::EngineError;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow becomes due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Due every `seconds` seconds.
    Interval { seconds: u64 },
    /// Due whenever the cron expression matches (5 fields, UTC).
    Cron { expression: String },
    /// Only runs via an explicit run-now request.
    Manual,
}

impl Trigger {
    /// Whether the scheduler loop ever submits this workflow on its own.
    pub fn is_scheduled(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

/// A single step in the workflow's ordered step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique name within this workflow.
    pub name: String,
    /// Maps to a registered `Step` implementation.
    pub step_type: String,
    /// Arbitrary configuration passed to the step at execution time.
    #[serde(default)]
    pub config: Value,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            config: Value::Null,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// Body of the `definition` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DefinitionBody {
    pub trigger: Trigger,
    pub steps: Vec<StepDefinition>,
}

/// A registered workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub trigger: Trigger,
    pub steps: Vec<StepDefinition>,
    pub lifecycle_state: LifecycleState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn is_active(&self) -> bool {
        self.lifecycle_state == LifecycleState::Active
    }
}

impl TryFrom<WorkflowRow> for WorkflowDefinition {
    type Error = EngineError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let body: DefinitionBody = serde_json::from_value(row.definition)?;
        Ok(Self {
            id: row.id,
            name: row.name,
            trigger: body.trigger,
            steps: body.steps,
            lifecycle_state: row.lifecycle_state,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Input to `register`: everything but the engine-assigned fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    pub trigger: Trigger,
    pub steps: Vec<StepDefinition>,
}

impl NewWorkflow {
    pub fn new(name: impl Into<String>, trigger: Trigger, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            trigger,
            steps,
        }
    }
}

/// Partial update merged by `update`. Absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowPatch {
    pub name: Option<String>,
    pub trigger: Option<Trigger>,
    pub steps: Option<Vec<StepDefinition>>,
    pub lifecycle_state: Option<LifecycleState>,
}

// ---------------------------------------------------------------------------
// WorkflowStats
// ---------------------------------------------------------------------------

/// Per-workflow statistics derived from the execution ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub workflow_id: Uuid,
    pub total_runs: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub cancelled_count: u64,
    /// Mean duration of terminal runs.
    pub average_duration_ms: Option<f64>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl WorkflowStats {
    /// Fold a workflow's execution records into statistics.
    pub fn from_records(workflow_id: Uuid, records: &[ExecutionRecord]) -> Self {
        let mut stats = Self {
            workflow_id,
            total_runs: records.len() as u64,
            success_count: 0,
            failure_count: 0,
            cancelled_count: 0,
            average_duration_ms: None,
            last_run_at: None,
        };

        let mut total_ms = 0i64;
        let mut timed = 0u64;
        for record in records {
            match record.status {
                ExecutionStatus::Succeeded => stats.success_count += 1,
                ExecutionStatus::Failed => stats.failure_count += 1,
                ExecutionStatus::Cancelled => stats.cancelled_count += 1,
                ExecutionStatus::Queued | ExecutionStatus::Running => {}
            }
            if let Some(ms) = record.duration_ms {
                total_ms += ms;
                timed += 1;
            }
            let ran_at = record.started_at.unwrap_or(record.queued_at);
            stats.last_run_at = Some(stats.last_run_at.map_or(ran_at, |t| t.max(ran_at)));
        }

        if timed > 0 {
            stats.average_duration_ms = Some(total_ms as f64 / timed as f64);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_serialises_with_type_tag() {
        let t = Trigger::Interval { seconds: 5 };
        assert_eq!(serde_json::to_value(&t).unwrap(), json!({ "type": "interval", "seconds": 5 }));

        let parsed: Trigger = serde_json::from_value(json!({ "type": "manual" })).unwrap();
        assert_eq!(parsed, Trigger::Manual);
        assert!(!parsed.is_scheduled());

        let cron: Trigger =
            serde_json::from_value(json!({ "type": "cron", "expression": "*/5 * * * *" })).unwrap();
        assert!(cron.is_scheduled());
    }

    #[test]
    fn patch_fields_default_to_none() {
        let patch: WorkflowPatch = serde_json::from_value(json!({ "name": "renamed" })).unwrap();
        assert_eq!(patch.name.as_deref(), Some("renamed"));
        assert!(patch.trigger.is_none());
        assert!(patch.lifecycle_state.is_none());
    }

    #[test]
    fn step_config_defaults_to_null() {
        let step: StepDefinition =
            serde_json::from_value(json!({ "name": "a", "step_type": "noop" })).unwrap();
        assert_eq!(step.config, Value::Null);
    }

    #[test]
    fn stats_fold_counts_and_durations() {
        let wf = Uuid::now_v7();
        let now = Utc::now();
        let record = |status, duration_ms: Option<i64>| ExecutionRecord {
            id: Uuid::now_v7(),
            seq: 0,
            workflow_id: wf,
            trigger_source: TriggerSource::Manual,
            status,
            queued_at: now,
            started_at: Some(now),
            completed_at: duration_ms.map(|_| now),
            error: None,
            steps_completed: 0,
            duration_ms,
        };

        let stats = WorkflowStats::from_records(
            wf,
            &[
                record(ExecutionStatus::Succeeded, Some(100)),
                record(ExecutionStatus::Failed, Some(300)),
                record(ExecutionStatus::Running, None),
            ],
        );

        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.average_duration_ms, Some(200.0));
        assert_eq!(stats.last_run_at, Some(now));

        let empty = WorkflowStats::from_records(wf, &[]);
        assert_eq!(empty.total_runs, 0);
        assert!(empty.average_duration_ms.is_none());
    }
}
