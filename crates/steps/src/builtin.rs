//! Built-in steps available to every engine instance.
//!
//! - `noop`: passes its input through unchanged.
//! - `log`: emits a tracing event with `config.message`.
//! - `delay`: sleeps for `config.ms` milliseconds, unwinding early on
//!   cancellation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::{Step, StepContext, StepError, StepRegistry};

/// Registry pre-populated with every built-in step.
pub fn default_registry() -> StepRegistry {
    StepRegistry::new()
        .with("noop", Arc::new(NoopStep))
        .with("log", Arc::new(LogStep))
        .with("delay", Arc::new(DelayStep))
}

/// Passes its input through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStep;

#[async_trait]
impl Step for NoopStep {
    async fn execute(&self, input: Value, _ctx: &StepContext) -> Result<Value, StepError> {
        Ok(input)
    }
}

/// Logs `config.message` and passes its input through.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStep;

#[async_trait]
impl Step for LogStep {
    async fn execute(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError> {
        let message = ctx
            .config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)");

        info!(
            workflow_id = %ctx.workflow_id,
            execution_id = %ctx.execution_id,
            step = %ctx.step_name,
            "{message}"
        );
        Ok(input)
    }
}

/// Sleeps for `config.ms` milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelayStep;

#[async_trait]
impl Step for DelayStep {
    async fn execute(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError> {
        let ms = ctx
            .config
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| StepError::Fatal("delay step requires an integer `ms` config".into()))?;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
            _ = ctx.cancelled() => return Err(StepError::Cancelled),
        }

        let mut out = json!({ "delayed_ms": ms });
        if let (Some(out_obj), Some(in_obj)) = (out.as_object_mut(), input.as_object()) {
            for (k, v) in in_obj {
                out_obj.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        Ok(out)
    }
}
