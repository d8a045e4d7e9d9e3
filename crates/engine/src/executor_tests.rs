//! Executor tests.
//!
//! These run against the in-memory store with `MockStep`s standing in for
//! real work, so every scenario is deterministic apart from task
//! scheduling.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use steps::mock::MockStep;
use steps::StepRegistry;
use tokio::sync::Notify;

use crate::config::EngineConfig;
use crate::executor::WorkflowExecutor;
use crate::ledger::ExecutionLedger;
use crate::models::{
    ExecutionStatus, LifecycleState, NewWorkflow, StepDefinition, Trigger, TriggerSource,
    WorkflowDefinition, WorkflowPatch,
};
use crate::registry::WorkflowRegistry;
use crate::EngineError;

struct Harness {
    registry: WorkflowRegistry,
    ledger: ExecutionLedger,
    executor: WorkflowExecutor,
}

fn harness(steps: StepRegistry, config: EngineConfig) -> Harness {
    let pool = db::create_pool();
    let steps = Arc::new(steps);
    let ledger = ExecutionLedger::new(pool.clone());
    let registry = WorkflowRegistry::new(pool, steps);
    Harness {
        executor: WorkflowExecutor::new(registry.clone(), ledger.clone(), config),
        registry,
        ledger,
    }
}

fn fast_retries() -> EngineConfig {
    EngineConfig::default().with_step_retries(3, Duration::from_millis(1))
}

/// Register a manual workflow whose steps use the given step types in order.
fn manual(h: &Harness, types: &[&str]) -> WorkflowDefinition {
    let steps = types
        .iter()
        .enumerate()
        .map(|(i, t)| StepDefinition::new(format!("s{i}"), *t))
        .collect();
    h.registry
        .register(NewWorkflow::new("wf", Trigger::Manual, steps))
        .unwrap()
}

// ============================================================
// Happy path
// ============================================================

#[tokio::test]
async fn steps_run_in_order_and_chain_outputs() {
    let first = Arc::new(MockStep::returning("first", json!({ "value": 1 })));
    let second = Arc::new(MockStep::returning("second", json!({ "value": 2 })));
    let h = harness(
        StepRegistry::new()
            .with("first", first.clone())
            .with("second", second.clone()),
        fast_retries(),
    );
    let wf = manual(&h, &["first", "second"]);

    let submission = h.executor.submit(&wf, TriggerSource::Manual).unwrap();
    assert_eq!(submission.record.status, ExecutionStatus::Queued);

    let done = submission.wait().await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Succeeded);
    assert_eq!(done.steps_completed, 2);
    assert!(done.started_at.is_some());
    assert!(done.completed_at >= done.started_at);
    assert_eq!(first.call_count(), 1);
    assert_eq!(second.call_count(), 1);

    // The second step saw the first step's output.
    let seen = second.calls()[0].clone();
    assert_eq!(seen["step"], "first");
    assert_eq!(seen["value"], 1);
}

#[tokio::test]
async fn first_step_receives_trigger_context() {
    let step = Arc::new(MockStep::returning("only", json!({})));
    let h = harness(StepRegistry::new().with("only", step.clone()), fast_retries());
    let wf = manual(&h, &["only"]);

    let done = h
        .executor
        .submit(&wf, TriggerSource::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();

    let input = step.calls()[0].clone();
    assert_eq!(input["workflow_id"], wf.id.to_string());
    assert_eq!(input["execution_id"], done.id.to_string());
    assert_eq!(input["trigger_source"], "manual");
}

// ============================================================
// Failure handling
// ============================================================

#[tokio::test]
async fn fatal_error_aborts_remaining_steps() {
    let after = Arc::new(MockStep::returning("after", json!({})));
    let h = harness(
        StepRegistry::new()
            .with("ok", Arc::new(MockStep::returning("ok", json!({}))))
            .with("boom", Arc::new(MockStep::failing_fatal("boom", "disk on fire")))
            .with("after", after.clone()),
        fast_retries(),
    );
    let wf = manual(&h, &["ok", "boom", "after"]);

    let done = h
        .executor
        .submit(&wf, TriggerSource::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.steps_completed, 1);
    assert_eq!(done.error.as_deref(), Some("step 's1' failed: disk on fire"));
    assert_eq!(after.call_count(), 0);
}

#[tokio::test]
async fn retryable_error_is_retried_until_success() {
    let flaky = Arc::new(MockStep::flaky("flaky", 2, "try again"));
    let h = harness(StepRegistry::new().with("flaky", flaky.clone()), fast_retries());
    let wf = manual(&h, &["flaky"]);

    let done = h
        .executor
        .submit(&wf, TriggerSource::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(done.status, ExecutionStatus::Succeeded);
    assert_eq!(flaky.call_count(), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let always = Arc::new(MockStep::failing_retryable("always", "still down"));
    let h = harness(StepRegistry::new().with("always", always.clone()), fast_retries());
    let wf = manual(&h, &["always"]);

    let done = h
        .executor
        .submit(&wf, TriggerSource::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(done.status, ExecutionStatus::Failed);
    // One initial attempt plus three retries.
    assert_eq!(always.call_count(), 4);
    assert!(done.error.unwrap().contains("still down"));
}

#[tokio::test]
async fn panicking_step_fails_the_run() {
    let h = harness(
        StepRegistry::new()
            .with("ok", Arc::new(MockStep::returning("ok", json!({}))))
            .with("boom", Arc::new(MockStep::panicking("boom", "kaboom"))),
        fast_retries(),
    );
    let wf = manual(&h, &["ok", "boom"]);

    let done = h
        .executor
        .submit(&wf, TriggerSource::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.steps_completed, 1);
    assert!(done.completed_at.is_some());
    assert_eq!(done.error.as_deref(), Some("step 's1' failed: panicked: kaboom"));
    assert_eq!(h.ledger.get(done.id).unwrap(), done);
    assert_eq!(h.ledger.running_count(wf.id), 0);
    assert!(!h.executor.is_in_flight(wf.id));
}

#[tokio::test]
async fn run_after_a_panic_is_the_only_one_running() {
    let gate = Arc::new(Notify::new());
    let h = harness(
        StepRegistry::new()
            .with("boom", Arc::new(MockStep::panicking("boom", "kaboom")))
            .with("wait", Arc::new(MockStep::gated("wait", gate.clone()))),
        fast_retries(),
    );
    let wf = manual(&h, &["boom"]);

    let crashed = h
        .executor
        .submit(&wf, TriggerSource::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(crashed.status, ExecutionStatus::Failed);

    let patched = h
        .registry
        .update(
            wf.id,
            WorkflowPatch {
                steps: Some(vec![StepDefinition::new("hold", "wait")]),
                ..Default::default()
            },
        )
        .unwrap();
    let held = h.executor.submit(&patched, TriggerSource::Manual).unwrap();
    while h.ledger.running_count(wf.id) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.ledger.running_count(wf.id), 1);

    gate.notify_one();
    assert_eq!(held.wait().await.unwrap().status, ExecutionStatus::Succeeded);

    let stats = h.ledger.stats_for(wf.id, &h.registry).unwrap();
    assert_eq!(stats.total_runs, 2);
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 1);
}

// ============================================================
// Mutual exclusion
// ============================================================

#[tokio::test]
async fn second_submission_is_rejected_while_in_flight() {
    let gate = Arc::new(Notify::new());
    let h = harness(
        StepRegistry::new().with("wait", Arc::new(MockStep::gated("wait", gate.clone()))),
        fast_retries(),
    );
    let wf = manual(&h, &["wait"]);

    let first = h.executor.submit(&wf, TriggerSource::Manual).unwrap();
    assert!(h.executor.is_in_flight(wf.id));
    assert!(matches!(
        h.executor.submit(&wf, TriggerSource::Scheduler),
        Err(EngineError::AlreadyRunning(id)) if id == wf.id
    ));

    gate.notify_one();
    first.wait().await.unwrap();
    assert!(!h.executor.is_in_flight(wf.id));

    // The marker is released, so the workflow can run again.
    gate.notify_one();
    let again = h.executor.submit(&wf, TriggerSource::Manual).unwrap();
    assert_eq!(again.wait().await.unwrap().status, ExecutionStatus::Succeeded);
    assert_eq!(h.ledger.history(Some(wf.id), 10).len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_admit_exactly_one() {
    let gate = Arc::new(Notify::new());
    let h = Arc::new(harness(
        StepRegistry::new().with("wait", Arc::new(MockStep::gated("wait", gate.clone()))),
        fast_retries(),
    ));
    let wf = Arc::new(manual(&h, &["wait"]));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let h = h.clone();
        let wf = wf.clone();
        tasks.push(tokio::spawn(async move {
            h.executor.submit(&wf, TriggerSource::Manual)
        }));
    }

    let mut accepted = Vec::new();
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(submission) => accepted.push(submission),
            Err(EngineError::AlreadyRunning(_)) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
        assert!(h.ledger.running_count(wf.id) <= 1);
    }

    assert_eq!(accepted.len(), 1);
    assert_eq!(rejected, 15);
    assert_eq!(h.ledger.history(Some(wf.id), 100).len(), 1);

    gate.notify_one();
    for submission in accepted {
        assert_eq!(submission.wait().await.unwrap().status, ExecutionStatus::Succeeded);
    }
}

#[tokio::test]
async fn workflows_do_not_block_each_other() {
    let gate = Arc::new(Notify::new());
    let h = harness(
        StepRegistry::new()
            .with("wait", Arc::new(MockStep::gated("wait", gate.clone())))
            .with("quick", Arc::new(MockStep::returning("quick", json!({})))),
        fast_retries(),
    );
    let blocked = manual(&h, &["wait"]);
    let free = manual(&h, &["quick"]);

    let held = h.executor.submit(&blocked, TriggerSource::Manual).unwrap();
    let done = h
        .executor
        .submit(&free, TriggerSource::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(done.status, ExecutionStatus::Succeeded);

    gate.notify_one();
    held.wait().await.unwrap();
}

#[tokio::test]
async fn paused_workflow_is_not_submitted() {
    let h = harness(
        StepRegistry::new().with("quick", Arc::new(MockStep::returning("quick", json!({})))),
        fast_retries(),
    );
    let wf = manual(&h, &["quick"]);
    let paused = h.registry.set_paused(wf.id, true).unwrap();

    assert!(matches!(
        h.executor.submit(&paused, TriggerSource::Manual),
        Err(EngineError::WorkflowPaused(_))
    ));
    assert!(h.ledger.history(None, 10).is_empty());
}

#[tokio::test]
async fn stale_snapshot_cannot_dispatch_a_disabled_workflow() {
    let h = harness(
        StepRegistry::new().with("quick", Arc::new(MockStep::returning("quick", json!({})))),
        fast_retries(),
    );
    let snapshot = manual(&h, &["quick"]);
    assert!(snapshot.is_active());

    h.registry
        .update(
            snapshot.id,
            WorkflowPatch {
                lifecycle_state: Some(LifecycleState::Disabled),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(matches!(
        h.executor.submit(&snapshot, TriggerSource::Manual),
        Err(EngineError::WorkflowPaused(id)) if id == snapshot.id
    ));
    assert!(h.ledger.history(None, 10).is_empty());
}

#[tokio::test]
async fn stale_snapshot_cannot_dispatch_a_removed_workflow() {
    let h = harness(
        StepRegistry::new().with("quick", Arc::new(MockStep::returning("quick", json!({})))),
        fast_retries(),
    );
    let snapshot = manual(&h, &["quick"]);
    h.registry.pause_all();
    assert!(matches!(
        h.executor.submit(&snapshot, TriggerSource::Scheduler),
        Err(EngineError::WorkflowPaused(_))
    ));

    h.registry.unregister(snapshot.id).unwrap();
    assert!(matches!(
        h.executor.submit(&snapshot, TriggerSource::Scheduler),
        Err(EngineError::NotFound(id)) if id == snapshot.id
    ));
    assert!(h.ledger.history(None, 10).is_empty());
}

// ============================================================
// Emergency stop
// ============================================================

#[tokio::test]
async fn emergency_stop_cancels_in_flight_run() {
    let h = harness(
        StepRegistry::new()
            .with("slow", Arc::new(MockStep::sleeping("slow", Duration::from_secs(30))))
            .with("never", Arc::new(MockStep::returning("never", json!({})))),
        fast_retries(),
    );
    let wf = manual(&h, &["slow", "never"]);

    let submission = h.executor.submit(&wf, TriggerSource::Manual).unwrap();
    tokio::task::yield_now().await;

    assert_eq!(h.executor.emergency_stop(), 1);
    assert!(h.executor.is_halted());

    let done = submission.wait().await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Cancelled);
    assert_eq!(done.steps_completed, 0);
    assert!(done.completed_at.is_some());
    assert_eq!(h.executor.in_flight_count(), 0);
}

#[tokio::test]
async fn halted_executor_rejects_until_resumed() {
    let h = harness(
        StepRegistry::new().with("quick", Arc::new(MockStep::returning("quick", json!({})))),
        fast_retries(),
    );
    let wf = manual(&h, &["quick"]);

    assert_eq!(h.executor.emergency_stop(), 0);
    assert!(matches!(
        h.executor.submit(&wf, TriggerSource::Manual),
        Err(EngineError::EngineHalted)
    ));
    assert!(h.ledger.history(None, 10).is_empty());

    assert!(h.executor.resume());
    assert!(!h.executor.resume());
    let done = h
        .executor
        .submit(&wf, TriggerSource::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(done.status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn emergency_stop_interrupts_retry_backoff() {
    let always = Arc::new(MockStep::failing_retryable("always", "down"));
    let h = harness(
        StepRegistry::new().with("always", always.clone()),
        EngineConfig::default().with_step_retries(10, Duration::from_secs(60)),
    );
    let wf = manual(&h, &["always"]);

    let submission = h.executor.submit(&wf, TriggerSource::Manual).unwrap();
    while always.call_count() == 0 {
        tokio::task::yield_now().await;
    }
    h.executor.emergency_stop();

    let done = submission.wait().await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Cancelled);
    assert_eq!(always.call_count(), 1);
}

// ============================================================
// Worker pool
// ============================================================

#[tokio::test]
async fn queued_run_waits_for_a_permit() {
    let gate = Arc::new(Notify::new());
    let h = harness(
        StepRegistry::new()
            .with("wait", Arc::new(MockStep::gated("wait", gate.clone())))
            .with("quick", Arc::new(MockStep::returning("quick", json!({})))),
        fast_retries().with_max_concurrent_executions(1),
    );
    let holder = manual(&h, &["wait"]);
    let waiter = manual(&h, &["quick"]);

    let held = h.executor.submit(&holder, TriggerSource::Manual).unwrap();
    while h.ledger.running_count(holder.id) == 0 {
        tokio::task::yield_now().await;
    }

    let queued = h.executor.submit(&waiter, TriggerSource::Manual).unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.ledger.get(queued.record.id).unwrap().status, ExecutionStatus::Queued);

    gate.notify_one();
    held.wait().await.unwrap();
    assert_eq!(queued.wait().await.unwrap().status, ExecutionStatus::Succeeded);
}
