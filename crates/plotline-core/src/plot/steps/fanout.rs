//! `fanout`: run a chain of sub-steps once per element of an array.
//!
//! `min(concurrency, items)` workers claim item indices from a shared
//! cursor. Each item runs the sub-steps sequentially against its own copy of
//! the parent context with the item bound at `itemPath`; child contexts are
//! discarded afterwards. Under `stopOnFirstError` the first failure stops
//! new claims (in-flight items finish) and fails the step; otherwise child
//! failures are dropped and the step succeeds.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinSet;

use plotline_types::plot::StepDef;
use plotline_types::run::FailureReason;

use super::{parse_inputs, required_path};
use crate::plot::context::Context;
use crate::plot::registry::{StepCall, StepError, StepHandler, StepOutcome, StepRegistry};
use crate::plot::runner::RunEnv;

pub struct FanoutStep;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FanoutInputs {
    from_path: String,
    #[serde(default)]
    item_path: Option<String>,
    #[serde(default)]
    steps: Vec<StepDef>,
    #[serde(default)]
    concurrency: Option<i64>,
    #[serde(default)]
    stop_on_first_error: Option<bool>,
}

struct FanoutPlan {
    from_path: String,
    item_path: String,
    steps: Vec<StepDef>,
    concurrency: usize,
    stop_on_first_error: bool,
}

fn plan(step: &StepDef) -> Result<FanoutPlan, StepError> {
    let inputs: FanoutInputs = parse_inputs(step)?;
    let item_path = inputs
        .item_path
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "item".to_string());
    Ok(FanoutPlan {
        from_path: required_path(&inputs.from_path, "fromPath")?,
        item_path,
        steps: inputs.steps,
        concurrency: usize::try_from(inputs.concurrency.unwrap_or(1).max(1)).unwrap_or(1),
        stop_on_first_error: inputs.stop_on_first_error.unwrap_or(true),
    })
}

/// A child that did not make it through the sub-step chain.
#[derive(Debug, Clone)]
struct ChildFailure {
    index: usize,
    step: String,
    reason: FailureReason,
}

/// State shared by the workers of one fanout execution.
struct FanoutJob {
    parent: Context,
    items: Vec<Value>,
    item_path: String,
    steps: Vec<StepDef>,
    stop_on_first_error: bool,
    cursor: AtomicUsize,
    cancelled: AtomicBool,
}

impl FanoutJob {
    async fn work(&self, env: &RunEnv) -> Vec<ChildFailure> {
        let mut failures = Vec::new();
        while !self.cancelled.load(Ordering::SeqCst) {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            if index >= self.items.len() {
                break;
            }
            if let Err(failure) = self.run_child(index, env).await {
                tracing::debug!(
                    index = failure.index,
                    step_id = %failure.step,
                    reason = %failure.reason,
                    "fanout child failed"
                );
                failures.push(failure);
                if self.stop_on_first_error {
                    self.cancelled.store(true, Ordering::SeqCst);
                }
            }
        }
        failures
    }

    async fn run_child(&self, index: usize, env: &RunEnv) -> Result<(), ChildFailure> {
        let mut ctx = self.parent.clone();
        ctx.set(&self.item_path, self.items[index].clone());
        for sub in &self.steps {
            if env.deadline_elapsed() {
                return Err(ChildFailure {
                    index,
                    step: sub.label().to_string(),
                    reason: FailureReason::Timeout,
                });
            }
            let summary = env.run_sub_step(sub, &mut ctx).await;
            if !summary.is_ok() {
                return Err(ChildFailure {
                    index,
                    step: sub.label().to_string(),
                    reason: summary.reason.unwrap_or(FailureReason::RetryExhausted),
                });
            }
        }
        Ok(())
    }
}

/// Spawn `workers` tasks over `job` and collect every child failure.
async fn run_workers(
    job: Arc<FanoutJob>,
    env: &RunEnv,
    workers: usize,
    label: &str,
) -> Vec<ChildFailure> {
    let mut set = JoinSet::new();
    for _ in 0..workers {
        let job = Arc::clone(&job);
        let env = env.clone();
        set.spawn(async move { job.work(&env).await });
    }

    let mut failures = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(mut worker_failures) => failures.append(&mut worker_failures),
            Err(e) => {
                tracing::warn!(error = %e, "fanout worker aborted");
                failures.push(ChildFailure {
                    index: job.items.len(),
                    step: label.to_string(),
                    reason: FailureReason::RetryExhausted,
                });
            }
        }
    }
    failures
}

impl StepHandler for FanoutStep {
    async fn execute(&self, call: StepCall<'_>) -> Result<StepOutcome, StepError> {
        let plan = plan(call.step)?;
        let items = match call.ctx.get(&plan.from_path) {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Err(StepError::invalid_input(format!(
                    "fromPath '{}' must resolve to an array",
                    plan.from_path
                )));
            }
        };
        let total = items.len();
        if total == 0 {
            return Ok(StepOutcome::default());
        }

        let workers = plan.concurrency.min(total);
        let job = Arc::new(FanoutJob {
            parent: call.ctx.clone(),
            items,
            item_path: plan.item_path,
            steps: plan.steps,
            stop_on_first_error: plan.stop_on_first_error,
            cursor: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        });
        let failures = run_workers(job, &call.env.for_children(), workers, call.step.label()).await;

        tracing::debug!(
            step_id = call.step.label(),
            items = total,
            workers,
            failed = failures.len(),
            "fanout finished"
        );

        if !failures.is_empty() && plan.stop_on_first_error {
            return Err(StepError::FanoutFailed {
                failed: failures.len(),
                total,
            });
        }
        Ok(StepOutcome::default())
    }

    fn validate(&self, step: &StepDef, registry: &StepRegistry) -> Result<(), StepError> {
        let plan = plan(step)?;
        for (i, sub) in plan.steps.iter().enumerate() {
            let handler = registry.get(&sub.step_type).ok_or_else(|| {
                StepError::invalid_input(format!(
                    "steps[{i}]: unknown step type '{}'",
                    sub.step_type
                ))
            })?;
            handler
                .validate_dyn(sub, registry)
                .map_err(|e| StepError::invalid_input(format!("steps[{i}]: {e}")))?;
        }
        Ok(())
    }
}
