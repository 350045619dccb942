//! Test-only step handlers and environment builders.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use plotline_types::plot::StepDef;

use super::policy::PolicyState;
use super::registry::{StepCall, StepError, StepHandler, StepOutcome, StepRegistry};
use super::runner::{RunEnv, StepRunner};
use super::trace::NoopTraceSink;

/// Fails its first `failTimes` attempts, counting attempts in the context
/// under `__unstable.<label>`.
pub struct UnstableStep;

impl StepHandler for UnstableStep {
    async fn execute(&self, call: StepCall<'_>) -> Result<StepOutcome, StepError> {
        let fail_times = call
            .step
            .inputs
            .get("failTimes")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let counter = format!("__unstable.{}", call.step.label());
        let seen = call.ctx.get(&counter).and_then(|v| v.as_u64()).unwrap_or(0) + 1;
        call.ctx.set(&counter, json!(seen));
        if seen <= fail_times {
            return Err(StepError::failed(format!("unstable attempt {seen}")));
        }
        Ok(StepOutcome::default())
    }
}

/// Fails when the context's `item` is the string `"boom"`.
pub struct MaybeFailStep;

impl StepHandler for MaybeFailStep {
    async fn execute(&self, call: StepCall<'_>) -> Result<StepOutcome, StepError> {
        if call.ctx.get("item") == Some(&json!("boom")) {
            return Err(StepError::failed("boom"));
        }
        Ok(StepOutcome::default())
    }
}

/// Sleeps for `inputs.ms` milliseconds.
pub struct SleepStep;

impl StepHandler for SleepStep {
    async fn execute(&self, call: StepCall<'_>) -> Result<StepOutcome, StepError> {
        let ms = call.step.inputs.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(StepOutcome::default())
    }
}

pub fn test_registry() -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry.register("unstable", UnstableStep);
    registry.register("maybe_fail", MaybeFailStep);
    registry.register("sleep", SleepStep);
    registry
}

pub fn runner_with_test_steps() -> StepRunner {
    StepRunner::new(Arc::new(test_registry()), Arc::new(PolicyState::new()))
}

pub fn test_env(runner: &StepRunner, deadline: Option<Duration>) -> RunEnv {
    RunEnv::new(
        runner.clone(),
        deadline.map(|d| Instant::now() + d),
        "test-trace",
        Arc::new(NoopTraceSink),
    )
}

pub fn unstable_step(id: &str, fail_times: u64) -> StepDef {
    StepDef::new(id, "unstable").with_inputs(json!({ "failTimes": fail_times }))
}
