//! `MockStep`: a test double for `Step`.
//!
//! Useful in unit and integration tests where a real step implementation is
//! either unavailable or irrelevant.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::{Step, StepContext, StepError};

/// Behaviour injected into `MockStep` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `n` calls, then succeed.
    Flaky { failures: u32, message: String },
    /// Sleep for the given duration (unwinding on cancellation), then succeed.
    Sleep(Duration),
    /// Block until the gate is notified (or cancellation), then succeed.
    Gate(Arc<Notify>),
    /// Panic with the given message.
    Panic(String),
}

/// A mock step that records every call it receives and returns a
/// programmer-specified result.
pub struct MockStep {
    /// Label used in test assertions.
    pub name: String,
    /// What the step will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this step (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
    attempts: AtomicU32,
}

impl MockStep {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicU32::new(0),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: u32, msg: impl Into<String>) -> Self {
        Self::with_behaviour(
            name,
            MockBehaviour::Flaky {
                failures,
                message: msg.into(),
            },
        )
    }

    /// Create a mock that sleeps before succeeding.
    pub fn sleeping(name: impl Into<String>, duration: Duration) -> Self {
        Self::with_behaviour(name, MockBehaviour::Sleep(duration))
    }

    /// Create a mock that waits on `gate` before succeeding.
    pub fn gated(name: impl Into<String>, gate: Arc<Notify>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Gate(gate))
    }

    /// Create a mock whose `execute` panics.
    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Panic(msg.into()))
    }

    /// Number of times this step has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every input received so far, in call order.
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn output(&self) -> Value {
        json!({ "step": self.name })
    }
}

#[async_trait]
impl Step for MockStep {
    async fn execute(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(input);
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Merge the step's own label into the output so tests can
                // trace the data flowing through the pipeline.
                let mut out = self.output();
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(out)
            }
            MockBehaviour::FailRetryable(msg) => Err(StepError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(StepError::Fatal(msg.clone())),
            MockBehaviour::Flaky { failures, message } => {
                if attempt <= *failures {
                    Err(StepError::Retryable(message.clone()))
                } else {
                    Ok(self.output())
                }
            }
            MockBehaviour::Sleep(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(*duration) => Ok(self.output()),
                    _ = ctx.cancelled() => Err(StepError::Cancelled),
                }
            }
            MockBehaviour::Gate(gate) => {
                tokio::select! {
                    _ = gate.notified() => Ok(self.output()),
                    _ = ctx.cancelled() => Err(StepError::Cancelled),
                }
            }
            MockBehaviour::Panic(msg) => panic!("{msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx() -> StepContext {
        StepContext::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "mock",
            Value::Null,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn returning_merges_label_and_value() {
        let step = MockStep::returning("a", json!({ "n": 1 }));
        let out = step.execute(json!({}), &ctx()).await.unwrap();

        assert_eq!(out["step"], "a");
        assert_eq!(out["n"], 1);
        assert_eq!(step.call_count(), 1);
    }

    #[tokio::test]
    async fn flaky_recovers_after_failures() {
        let step = MockStep::flaky("f", 2, "transient");
        let c = ctx();

        assert!(matches!(step.execute(json!({}), &c).await, Err(StepError::Retryable(_))));
        assert!(matches!(step.execute(json!({}), &c).await, Err(StepError::Retryable(_))));
        assert!(step.execute(json!({}), &c).await.is_ok());
        assert_eq!(step.call_count(), 3);
    }

    #[tokio::test]
    async fn gated_step_unwinds_on_cancel() {
        let gate = Arc::new(Notify::new());
        let step = MockStep::gated("g", gate);
        let token = CancellationToken::new();
        let c = StepContext::new(Uuid::now_v7(), Uuid::now_v7(), "g", Value::Null, token.clone());

        token.cancel();
        assert_eq!(step.execute(json!({}), &c).await, Err(StepError::Cancelled));
    }
}
