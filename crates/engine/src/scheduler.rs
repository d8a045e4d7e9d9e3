//! Scheduler loop: evaluates triggers on a fixed tick and submits due
//! workflows to the executor.
//!
//! The scheduler keeps one `next_due` instant per scheduled workflow.
//! Interval triggers are anchored at the definition's `updated_at`; cron
//! triggers at the first tick that sees the definition. Whenever the
//! trigger or the lifecycle state changes, `next_due` is recomputed; edits
//! to the name or the steps leave the schedule alone. After a fire, the next
//! occurrence is computed from the fire time, so occurrences missed while
//! the loop was busy, paused or halted are never backfilled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use db::models::TriggerSource;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cron::CronSchedule;
use crate::executor::{Submission, WorkflowExecutor};
use crate::models::{LifecycleState, Trigger, WorkflowDefinition};
use crate::registry::WorkflowRegistry;
use crate::validate::interval_delta;
use crate::EngineError;

/// How often a workflow recurs.
enum Cadence {
    Every(TimeDelta),
    Cron(CronSchedule),
}

impl Cadence {
    fn from_trigger(trigger: &Trigger) -> Option<Self> {
        match trigger {
            Trigger::Manual => None,
            Trigger::Interval { seconds } => interval_delta(*seconds).map(Self::Every),
            Trigger::Cron { expression } => CronSchedule::parse(expression).ok().map(Self::Cron),
        }
    }

    fn next_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Every(step) => at.checked_add_signed(*step),
            Self::Cron(schedule) => schedule.next_after(at),
        }
    }
}

struct DueState {
    /// Trigger and lifecycle state this state was computed from.
    version: (Trigger, LifecycleState),
    cadence: Cadence,
    next_due: Option<DateTime<Utc>>,
}

impl DueState {
    fn new(workflow: &WorkflowDefinition, cadence: Cadence, now: DateTime<Utc>) -> Self {
        let anchor = match cadence {
            Cadence::Every(_) => workflow.updated_at,
            Cadence::Cron(_) => now,
        };
        Self {
            version: (workflow.trigger.clone(), workflow.lifecycle_state),
            next_due: cadence.next_after(anchor),
            cadence,
        }
    }

    fn is_current(&self, workflow: &WorkflowDefinition) -> bool {
        self.version.0 == workflow.trigger && self.version.1 == workflow.lifecycle_state
    }
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Executions accepted by the executor on this tick.
    pub submitted: Vec<Submission>,
    /// Workflows that were due but still had a run in flight.
    pub coalesced: Vec<Uuid>,
    /// Workflows that were due while dispatch was halted.
    pub skipped_halted: Vec<Uuid>,
}

impl TickReport {
    pub fn submitted_count(&self) -> usize {
        self.submitted.len()
    }
}

pub struct Scheduler {
    registry: WorkflowRegistry,
    executor: WorkflowExecutor,
    tick_interval: Duration,
    due: Mutex<HashMap<Uuid, DueState>>,
}

impl Scheduler {
    pub fn new(registry: WorkflowRegistry, executor: WorkflowExecutor, tick_interval: Duration) -> Self {
        Self {
            registry,
            executor,
            tick_interval,
            due: Mutex::new(HashMap::new()),
        }
    }

    /// The instant a workflow is next due, if the scheduler tracks it.
    pub fn next_due(&self, workflow_id: Uuid) -> Option<DateTime<Utc>> {
        self.due.lock().get(&workflow_id).and_then(|s| s.next_due)
    }

    /// Evaluate every workflow once against `now` and submit the due ones.
    ///
    /// Never waits on a run. Must be called from within a Tokio runtime.
    #[instrument(skip(self), level = "debug")]
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let workflows = match self.registry.list() {
            Ok(workflows) => workflows,
            Err(e) => {
                error!("scheduler could not list workflows: {e}");
                return report;
            }
        };

        let mut due = self.due.lock();
        due.retain(|id, _| workflows.iter().any(|w| w.id == *id));

        let mut halted = self.executor.is_halted();

        for workflow in &workflows {
            let stale = due
                .get(&workflow.id)
                .map_or(true, |state| !state.is_current(workflow));
            if stale {
                match Cadence::from_trigger(&workflow.trigger) {
                    Some(cadence) => {
                        due.insert(workflow.id, DueState::new(workflow, cadence, now));
                    }
                    None => {
                        due.remove(&workflow.id);
                        continue;
                    }
                }
            }

            let Some(state) = due.get_mut(&workflow.id) else {
                continue;
            };
            if !workflow.is_active() || state.next_due.map_or(true, |at| at > now) {
                continue;
            }

            if halted {
                report.skipped_halted.push(workflow.id);
            } else {
                match self.executor.submit(workflow, TriggerSource::Scheduler) {
                    Ok(submission) => report.submitted.push(submission),
                    Err(EngineError::AlreadyRunning(id)) => {
                        debug!(workflow_id = %id, "occurrence coalesced with in-flight run");
                        report.coalesced.push(id);
                    }
                    Err(EngineError::EngineHalted) => {
                        halted = true;
                        report.skipped_halted.push(workflow.id);
                    }
                    Err(e) => warn!(workflow_id = %workflow.id, "scheduled submission rejected: {e}"),
                }
            }

            state.next_due = state.cadence.next_after(now);
        }

        if !report.submitted.is_empty() {
            debug!(submitted = report.submitted.len(), "tick dispatched executions");
        }
        report
    }

    /// Run the tick loop in the background until the handle is shut down.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let token = CancellationToken::new();
        let stop = token.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(tick_interval = ?self.tick_interval, "scheduler started");

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick(Utc::now());
                    }
                }
            }

            info!("scheduler stopped");
        });

        SchedulerHandle { token, join }
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop ticking and wait for the loop to exit. In-flight executions are
    /// not affected.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            error!("scheduler task ended abnormally: {e}");
        }
    }
}
