//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Checks the halted flag, the workflow's live lifecycle state and the
//!    per-workflow in-flight marker, and appends a `Queued` record, all
//!    under one lock.
//! 2. Spawns the run onto the worker pool (bounded by a semaphore).
//! 3. Iterates through steps in order, passing each step's JSON output as
//!    input to the next.
//! 4. Handles `StepError::Retryable` (up to `step_max_retries`) and
//!    `StepError::Fatal` (abort immediately, remaining steps skipped).
//! 5. Observes cancellation at step boundaries and during retry back-off.
//!
//! Steps run on their own task so a panicking step is recorded as a failure
//! of that step instead of leaving its record `Running`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use db::models::{ExecutionTransition, TriggerSource};
use parking_lot::Mutex;
use serde_json::{json, Value};
use steps::{Step, StepContext, StepError};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::ledger::ExecutionLedger;
use crate::models::{ExecutionRecord, ExecutionStatus, LifecycleState, StepDefinition, WorkflowDefinition};
use crate::registry::WorkflowRegistry;
use crate::validate::ValidationError;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Control state
// ---------------------------------------------------------------------------

/// Marker held for the lifetime of one execution.
struct InFlight {
    execution_id: Uuid,
    token: CancellationToken,
}

/// Process-wide dispatch state. The halted flag and the in-flight set share
/// a lock so an emergency stop can never miss a run that is being admitted.
#[derive(Default)]
struct ControlState {
    halted: bool,
    in_flight: HashMap<Uuid, InFlight>,
}

/// Resolved steps of one run, in order.
type Plan = Arc<[(StepDefinition, Arc<dyn Step>)]>;

struct Inner {
    registry: WorkflowRegistry,
    ledger: ExecutionLedger,
    config: EngineConfig,
    control: Mutex<ControlState>,
    permits: Arc<Semaphore>,
}

/// Releases the in-flight marker when a run ends, however it ends.
struct InFlightGuard {
    inner: Arc<Inner>,
    workflow_id: Uuid,
    execution_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut control = self.inner.control.lock();
        let owned = control
            .in_flight
            .get(&self.workflow_id)
            .is_some_and(|f| f.execution_id == self.execution_id);
        if owned {
            control.in_flight.remove(&self.workflow_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// An accepted submission.
#[derive(Debug)]
pub struct Submission {
    /// The record as it was appended (`Queued`).
    pub record: ExecutionRecord,
    handle: JoinHandle<ExecutionRecord>,
}

impl Submission {
    /// Wait for the execution to reach a terminal state.
    pub async fn wait(self) -> Result<ExecutionRecord, EngineError> {
        self.handle
            .await
            .map_err(|e| EngineError::TaskAborted(e.to_string()))
    }
}

/// How a run ended.
enum Outcome {
    Succeeded { steps_completed: u32 },
    Failed { step: String, message: String, steps_completed: u32 },
    Cancelled { steps_completed: u32 },
}

impl Outcome {
    fn into_transition(self) -> ExecutionTransition {
        let now = Utc::now();
        match self {
            Self::Succeeded { steps_completed } => {
                ExecutionTransition::to(ExecutionStatus::Succeeded, now).with_steps_completed(steps_completed)
            }
            Self::Failed { step, message, steps_completed } => {
                let cause = EngineError::StepExecutionFailed { step, message };
                ExecutionTransition::to(ExecutionStatus::Failed, now)
                    .with_error(cause.to_string())
                    .with_steps_completed(steps_completed)
            }
            Self::Cancelled { steps_completed } => {
                ExecutionTransition::to(ExecutionStatus::Cancelled, now).with_steps_completed(steps_completed)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs workflow executions with per-workflow mutual exclusion.
///
/// Cheap to clone; clones share the in-flight set, the halted flag and the
/// worker permits. [`WorkflowExecutor::submit`] must be called from within a
/// Tokio runtime.
#[derive(Clone)]
pub struct WorkflowExecutor {
    inner: Arc<Inner>,
}

impl WorkflowExecutor {
    /// Create a new executor.
    ///
    /// Step types are resolved against the registry's step registry, and the
    /// registry is consulted for the live lifecycle state at admission.
    pub fn new(registry: WorkflowRegistry, ledger: ExecutionLedger, config: EngineConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_executions.max(1)));
        Self {
            inner: Arc::new(Inner {
                registry,
                ledger,
                config,
                control: Mutex::new(ControlState::default()),
                permits,
            }),
        }
    }

    /// Admit one execution of `workflow` and start it in the background.
    ///
    /// Steps are taken from the snapshot passed in; later edits or an
    /// unregistration do not affect a run already admitted. The lifecycle
    /// state is not: it is re-read from the registry under the dispatch
    /// lock, so a pause, disable or removal that commits before admission
    /// always wins over a stale snapshot.
    ///
    /// # Errors
    /// - [`EngineError::EngineHalted`] while an emergency stop is in effect.
    /// - [`EngineError::NotFound`] if the workflow is no longer registered.
    /// - [`EngineError::WorkflowPaused`] if the workflow is not Active.
    /// - [`EngineError::AlreadyRunning`] if a run of this workflow is in flight.
    /// - [`EngineError::InvalidDefinition`] if a step type cannot be resolved.
    pub fn submit(
        &self,
        workflow: &WorkflowDefinition,
        source: TriggerSource,
    ) -> Result<Submission, EngineError> {
        let plan = self.resolve(&workflow.steps)?;
        let token = CancellationToken::new();

        // Lock order: control, then the workflows table, then executions.
        let record = {
            let mut control = self.inner.control.lock();
            if control.halted {
                return Err(EngineError::EngineHalted);
            }
            if self.inner.registry.lifecycle_state(workflow.id)? != LifecycleState::Active {
                return Err(EngineError::WorkflowPaused(workflow.id));
            }
            if control.in_flight.contains_key(&workflow.id) {
                return Err(EngineError::AlreadyRunning(workflow.id));
            }

            let record = self.inner.ledger.append(workflow.id, source);
            control.in_flight.insert(
                workflow.id,
                InFlight {
                    execution_id: record.id,
                    token: token.clone(),
                },
            );
            record
        };

        let guard = InFlightGuard {
            inner: self.inner.clone(),
            workflow_id: workflow.id,
            execution_id: record.id,
        };
        info!(workflow_id = %workflow.id, execution_id = %record.id, ?source, "execution queued");

        let handle = tokio::spawn(drive(
            self.inner.clone(),
            workflow.id,
            source,
            plan,
            record.clone(),
            token,
            guard,
        ));

        Ok(Submission { record, handle })
    }

    /// Halt all dispatch and signal cancellation to every in-flight run.
    ///
    /// Returns the number of runs signalled.
    pub fn emergency_stop(&self) -> usize {
        let mut control = self.inner.control.lock();
        control.halted = true;
        for in_flight in control.in_flight.values() {
            in_flight.token.cancel();
        }
        let signalled = control.in_flight.len();
        warn!(signalled, "emergency stop: dispatch halted");
        signalled
    }

    /// Clear the halted flag. Returns whether the engine was halted.
    pub fn resume(&self) -> bool {
        let mut control = self.inner.control.lock();
        let was_halted = std::mem::replace(&mut control.halted, false);
        if was_halted {
            info!("dispatch resumed");
        }
        was_halted
    }

    pub fn is_halted(&self) -> bool {
        self.inner.control.lock().halted
    }

    /// Whether a run of `workflow_id` currently holds the in-flight marker.
    pub fn is_in_flight(&self, workflow_id: Uuid) -> bool {
        self.inner.control.lock().in_flight.contains_key(&workflow_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.control.lock().in_flight.len()
    }

    fn resolve(&self, steps: &[StepDefinition]) -> Result<Plan, EngineError> {
        steps
            .iter()
            .map(|def| {
                self.inner
                    .registry
                    .steps()
                    .get(&def.step_type)
                    .map(|step| (def.clone(), step))
                    .ok_or_else(|| {
                        EngineError::InvalidDefinition(ValidationError::UnknownStepType {
                            step: def.name.clone(),
                            step_type: def.step_type.clone(),
                        })
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Plan::from)
    }
}

// ---------------------------------------------------------------------------
// Internal: one execution from Queued to a terminal state.
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(workflow_id = %workflow_id, execution_id = %record.id))]
async fn drive(
    inner: Arc<Inner>,
    workflow_id: Uuid,
    source: TriggerSource,
    plan: Plan,
    record: ExecutionRecord,
    token: CancellationToken,
    _guard: InFlightGuard,
) -> ExecutionRecord {
    // Wait for a worker slot; an emergency stop while queued skips the wait.
    let _permit = tokio::select! {
        permit = inner.permits.clone().acquire_owned() => permit.ok(),
        _ = token.cancelled() => None,
    };

    let running = match inner.ledger.transition(
        record.id,
        ExecutionStatus::Queued,
        ExecutionTransition::to(ExecutionStatus::Running, Utc::now()),
    ) {
        Ok(running) => running,
        Err(e) => {
            error!("could not mark execution running: {e}");
            return record;
        }
    };
    info!("execution running");

    let outcome = if token.is_cancelled() {
        Outcome::Cancelled { steps_completed: 0 }
    } else {
        let progress = Arc::new(AtomicU32::new(0));
        let steps = tokio::spawn({
            let config = inner.config.clone();
            let plan = plan.clone();
            let token = token.clone();
            let progress = progress.clone();
            let execution_id = record.id;
            async move {
                run_steps(&config, workflow_id, execution_id, source, &plan, &token, &progress)
                    .await
            }
            .in_current_span()
        });
        match steps.await {
            Ok(outcome) => outcome,
            Err(e) => unwound(e, &plan, progress.load(Ordering::SeqCst)),
        }
    };

    match inner
        .ledger
        .transition(record.id, ExecutionStatus::Running, outcome.into_transition())
    {
        Ok(done) => {
            match done.status {
                ExecutionStatus::Succeeded => info!(duration_ms = ?done.duration_ms, "execution succeeded"),
                ExecutionStatus::Cancelled => warn!(steps_completed = done.steps_completed, "execution cancelled"),
                _ => error!(error = ?done.error, "execution failed"),
            }
            done
        }
        Err(e) => {
            error!("could not record execution outcome: {e}");
            running
        }
    }
}

/// Map a step task that did not return into an outcome.
///
/// `steps_completed` is the index of the step that was running.
fn unwound(err: JoinError, plan: &[(StepDefinition, Arc<dyn Step>)], steps_completed: u32) -> Outcome {
    if !err.is_panic() {
        return Outcome::Cancelled { steps_completed };
    }

    let payload = err.into_panic();
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    let step = plan
        .get(steps_completed as usize)
        .map_or_else(|| "unknown".to_owned(), |(def, _)| def.name.clone());

    error!("step '{step}' panicked: {reason}");
    Outcome::Failed {
        step,
        message: format!("panicked: {reason}"),
        steps_completed,
    }
}

async fn run_steps(
    config: &EngineConfig,
    workflow_id: Uuid,
    execution_id: Uuid,
    source: TriggerSource,
    plan: &[(StepDefinition, Arc<dyn Step>)],
    token: &CancellationToken,
    progress: &AtomicU32,
) -> Outcome {
    let mut current_input = json!({
        "workflow_id": workflow_id,
        "execution_id": execution_id,
        "trigger_source": source,
    });

    for (index, (def, step)) in plan.iter().enumerate() {
        let steps_completed = index as u32;
        progress.store(steps_completed, Ordering::SeqCst);
        if token.is_cancelled() {
            return Outcome::Cancelled { steps_completed };
        }

        let ctx = StepContext::new(
            workflow_id,
            execution_id,
            def.name.clone(),
            def.config.clone(),
            token.clone(),
        );

        match execute_with_retry(config, step.as_ref(), current_input, ctx).await {
            Ok(output) => {
                info!("step '{}' succeeded", def.name);
                current_input = output;
            }
            Err(_) if token.is_cancelled() => return Outcome::Cancelled { steps_completed },
            Err(StepError::Cancelled) => return Outcome::Cancelled { steps_completed },
            Err(e) => {
                error!("step '{}' failed: {}", def.name, e);
                return Outcome::Failed {
                    step: def.name.clone(),
                    message: e.message().to_owned(),
                    steps_completed,
                };
            }
        }
    }

    Outcome::Succeeded {
        steps_completed: plan.len() as u32,
    }
}

/// Execute a single step, retrying retryable failures with exponential
/// back-off.
async fn execute_with_retry(
    config: &EngineConfig,
    step: &dyn Step,
    input: Value,
    ctx: StepContext,
) -> Result<Value, StepError> {
    let mut attempts = 0u32;

    loop {
        let attempt_ctx = ctx.clone().with_attempt(attempts + 1);
        match step.execute(input.clone(), &attempt_ctx).await {
            Ok(output) => return Ok(output),

            Err(StepError::Retryable(msg)) => {
                attempts += 1;
                if attempts > config.step_max_retries {
                    return Err(StepError::Retryable(msg));
                }

                let delay = config
                    .retry_base_delay
                    .saturating_mul(2u32.saturating_pow(attempts - 1));

                warn!(
                    "step '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                    ctx.step_name, attempts, config.step_max_retries, delay, msg
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancelled() => return Err(StepError::Cancelled),
                }
            }

            Err(other) => return Err(other),
        }
    }
}
