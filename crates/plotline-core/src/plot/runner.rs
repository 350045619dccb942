//! Runs a single step under its resilience policies.
//!
//! Per attempt: circuit breaker admission, rate-limit token, then the
//! handler (bounded by `timeoutMs` when set). Failed attempts are retried
//! with backoff until `retry.max` is used up, the breaker rejects, or the
//! run deadline passes between attempts.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use plotline_types::plot::StepDef;
use plotline_types::run::FailureReason;

use super::backoff::retry_delay;
use super::context::Context;
use super::policy::PolicyState;
use super::registry::{StepCall, StepHandlerDyn, StepOutcome, StepRegistry};
use super::trace::{NoopTraceSink, TraceEvent, TraceSink};

// ---------------------------------------------------------------------------
// RunEnv
// ---------------------------------------------------------------------------

/// Per-run environment handed to every handler: the runner (for nested
/// steps), the run deadline, the trace id and the trace sink.
#[derive(Clone)]
pub struct RunEnv {
    runner: StepRunner,
    deadline: Option<Instant>,
    trace_id: String,
    trace: Arc<dyn TraceSink>,
}

impl RunEnv {
    pub fn new(
        runner: StepRunner,
        deadline: Option<Instant>,
        trace_id: impl Into<String>,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            runner,
            deadline,
            trace_id: trace_id.into(),
            trace,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn deadline_elapsed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Run a nested step (e.g. a fanout sub-step) with its own policies.
    pub async fn run_sub_step(&self, step: &StepDef, ctx: &mut Context) -> StepSummary {
        self.runner.run_step(step, ctx, self).await
    }

    /// Environment for nested work: same runner and deadline, no trace
    /// output.
    pub fn for_children(&self) -> RunEnv {
        RunEnv {
            runner: self.runner.clone(),
            deadline: self.deadline,
            trace_id: self.trace_id.clone(),
            trace: Arc::new(NoopTraceSink),
        }
    }

    pub fn emit(&self, event: TraceEvent) {
        self.trace.emit(&event);
    }
}

// ---------------------------------------------------------------------------
// StepSummary
// ---------------------------------------------------------------------------

/// Result of running a step to completion (all attempts).
#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    /// Set when the last attempt succeeded.
    pub outcome: Option<StepOutcome>,
    pub attempts: u32,
    pub reason: Option<FailureReason>,
    /// Message of the last failed attempt.
    pub error: Option<String>,
}

impl StepSummary {
    fn ok(attempts: u32, outcome: StepOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            attempts,
            reason: None,
            error: None,
        }
    }

    pub(crate) fn failed(attempts: u32, reason: FailureReason, error: Option<String>) -> Self {
        Self {
            outcome: None,
            attempts,
            reason: Some(reason),
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_some()
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Outcome of one attempt.
enum Attempt {
    Done(StepOutcome),
    Failed {
        reason: FailureReason,
        error: String,
        /// Whether the failure feeds the circuit breaker.
        counts: bool,
    },
}

/// Registry dispatch plus the shared policy state.
#[derive(Clone)]
pub struct StepRunner {
    registry: Arc<StepRegistry>,
    policies: Arc<PolicyState>,
}

impl StepRunner {
    pub fn new(registry: Arc<StepRegistry>, policies: Arc<PolicyState>) -> Self {
        Self { registry, policies }
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    pub fn policies(&self) -> &Arc<PolicyState> {
        &self.policies
    }

    /// Run `step` until it succeeds or its policies give up.
    pub async fn run_step(&self, step: &StepDef, ctx: &mut Context, env: &RunEnv) -> StepSummary {
        let label = step.label();
        let Some(handler) = self.registry.get(&step.step_type).cloned() else {
            return StepSummary::failed(
                1,
                FailureReason::RetryExhausted,
                Some(format!("no handler registered for step type '{}'", step.step_type)),
            );
        };

        let retry = step.retry.clone().unwrap_or_default();
        let max_attempts = retry.max_attempts();
        let breaker = step.breaker.as_ref().map(|policy| (step.breaker_key(), policy));
        let mut attempts: u32 = 0;
        let mut last_error: Option<String> = None;

        loop {
            if attempts > 0 && env.deadline_elapsed() {
                tracing::debug!(step_id = label, attempts, "deadline elapsed before retry");
                return StepSummary::failed(attempts, FailureReason::BudgetExceeded, last_error);
            }

            if let Some((key, policy)) = &breaker {
                if !self.policies.breaker_admit(key, policy, Instant::now()) {
                    let opens = self
                        .policies
                        .breaker_snapshot(key)
                        .map_or(0, |snapshot| snapshot.opens);
                    tracing::debug!(step_id = label, breaker = %key, opens, "circuit open, call rejected");
                    return StepSummary::failed(
                        attempts + 1,
                        FailureReason::BreakerOpen,
                        last_error,
                    );
                }
            }

            attempts += 1;
            let (reason, error, counts) = match self.attempt(handler.as_ref(), step, ctx, env).await {
                Attempt::Done(outcome) => {
                    if let Some((key, _)) = &breaker {
                        self.policies.breaker_success(key);
                    }
                    return StepSummary::ok(attempts, outcome);
                }
                Attempt::Failed {
                    reason,
                    error,
                    counts,
                } => (reason, error, counts),
            };

            if let Some((key, _)) = &breaker {
                if counts {
                    self.policies.breaker_failure(key, Instant::now());
                } else {
                    self.policies.breaker_release(key);
                }
            }

            if attempts >= max_attempts {
                tracing::debug!(step_id = label, attempts, %reason, error = %error, "step failed");
                return StepSummary::failed(attempts, reason, Some(error));
            }

            let attempt_label = attempts.to_string();
            let delay = retry_delay(&retry, attempts, &[env.trace_id(), label, &attempt_label]);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            tracing::debug!(
                step_id = label,
                attempt = attempts,
                delay_ms,
                %reason,
                error = %error,
                "attempt failed, retrying"
            );
            env.emit(TraceEvent::Retry {
                id: label.to_string(),
                attempt: attempts,
                delay_ms,
            });
            last_error = Some(error);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn attempt(
        &self,
        handler: &dyn StepHandlerDyn,
        step: &StepDef,
        ctx: &mut Context,
        env: &RunEnv,
    ) -> Attempt {
        if let Some(limit) = &step.rate_limit {
            if !self.policies.acquire_token(limit, Instant::now()) {
                return Attempt::Failed {
                    reason: FailureReason::RateLimit,
                    error: format!("rate limit '{}' exhausted", limit.key),
                    counts: false,
                };
            }
        }

        let call = StepCall { ctx, step, env };
        let result = match step.timeout_ms {
            Some(ms) if ms > 0 => {
                match tokio::time::timeout(Duration::from_millis(ms), handler.execute_boxed(call)).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Attempt::Failed {
                            reason: FailureReason::Timeout,
                            error: format!("step timed out after {ms}ms"),
                            counts: true,
                        };
                    }
                }
            }
            _ => handler.execute_boxed(call).await,
        };

        match result {
            Ok(outcome) => Attempt::Done(outcome),
            Err(e) => Attempt::Failed {
                reason: e.failure_reason(),
                error: e.to_string(),
                counts: true,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::test_support::{runner_with_test_steps, test_env, unstable_step};
    use crate::plot::trace::MemoryTraceSink;
    use plotline_types::plot::{BreakerPolicy, RateLimitPolicy, RetryPolicy};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let runner = runner_with_test_steps();
        let env = test_env(&runner, None);
        let mut step = unstable_step("u1", 2);
        step.retry = Some(RetryPolicy {
            max: 2,
            backoff_ms: vec![0, 0],
            ..RetryPolicy::default()
        });

        let mut ctx = Context::new();
        let summary = runner.run_step(&step, &mut ctx, &env).await;
        assert!(summary.is_ok());
        assert_eq!(summary.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_keeps_last_error() {
        let runner = runner_with_test_steps();
        let env = test_env(&runner, None);
        let mut step = unstable_step("u1", 5);
        step.retry = Some(RetryPolicy {
            max: 1,
            ..RetryPolicy::default()
        });

        let mut ctx = Context::new();
        let summary = runner.run_step(&step, &mut ctx, &env).await;
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.reason, Some(FailureReason::RetryExhausted));
        assert!(summary.error.unwrap().contains("unstable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_and_traces_retries() {
        let runner = runner_with_test_steps();
        let sink = Arc::new(MemoryTraceSink::new());
        let env = RunEnv::new(runner.clone(), None, "trace-1", sink.clone());
        let mut step = unstable_step("u1", 2);
        step.retry = Some(RetryPolicy {
            max: 2,
            backoff_ms: vec![10, 20],
            ..RetryPolicy::default()
        });

        let started = Instant::now();
        let mut ctx = Context::new();
        let summary = runner.run_step(&step, &mut ctx, &env).await;
        assert!(summary.is_ok());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(40), "{elapsed:?}");
        assert_eq!(
            sink.events(),
            vec![
                TraceEvent::Retry {
                    id: "u1".to_string(),
                    attempt: 1,
                    delay_ms: 10
                },
                TraceEvent::Retry {
                    id: "u1".to_string(),
                    attempt: 2,
                    delay_ms: 20
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_between_retries_is_budget_exceeded() {
        let runner = runner_with_test_steps();
        let env = test_env(&runner, Some(Duration::from_millis(15)));
        let mut step = unstable_step("u1", 5);
        step.retry = Some(RetryPolicy {
            max: 5,
            backoff_ms: vec![10],
            ..RetryPolicy::default()
        });

        let mut ctx = Context::new();
        let summary = runner.run_step(&step, &mut ctx, &env).await;
        assert_eq!(summary.reason, Some(FailureReason::BudgetExceeded));
        assert_eq!(summary.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_rejection_is_terminal() {
        let runner = runner_with_test_steps();
        let env = test_env(&runner, None);
        let mut step = unstable_step("u1", 10);
        step.retry = Some(RetryPolicy {
            max: 3,
            ..RetryPolicy::default()
        });
        step.breaker = Some(BreakerPolicy::new(1, 1000, 1));

        let mut ctx = Context::new();
        let summary = runner.run_step(&step, &mut ctx, &env).await;
        assert_eq!(summary.reason, Some(FailureReason::BreakerOpen));
        assert_eq!(summary.attempts, 2);
        assert_eq!(ctx.get("__unstable.u1"), Some(&json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_on_last_attempt() {
        let runner = runner_with_test_steps();
        let env = test_env(&runner, None);
        let mut step = unstable_step("u1", 0);
        step.rate_limit = Some(RateLimitPolicy {
            key: "api".to_string(),
            limit: 1,
            interval_ms: 1000,
        });

        let mut ctx = Context::new();
        assert!(runner.run_step(&step, &mut ctx, &env).await.is_ok());
        let second = runner.run_step(&step, &mut ctx, &env).await;
        assert_eq!(second.reason, Some(FailureReason::RateLimit));
        assert_eq!(second.attempts, 1);

        // A retry after the window reopens gets through.
        step.retry = Some(RetryPolicy {
            max: 1,
            backoff_ms: vec![1000],
            ..RetryPolicy::default()
        });
        let third = runner.run_step(&step, &mut ctx, &env).await;
        assert!(third.is_ok());
        assert_eq!(third.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout() {
        let runner = runner_with_test_steps();
        let env = test_env(&runner, None);
        let mut step = StepDef::new("slow", "sleep").with_inputs(json!({ "ms": 100 }));
        step.timeout_ms = Some(20);

        let mut ctx = Context::new();
        let summary = runner.run_step(&step, &mut ctx, &env).await;
        assert_eq!(summary.reason, Some(FailureReason::Timeout));
        assert_eq!(summary.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_means_unbounded() {
        let runner = runner_with_test_steps();
        let env = test_env(&runner, None);
        let mut step = StepDef::new("slow", "sleep").with_inputs(json!({ "ms": 100 }));
        step.timeout_ms = Some(0);

        let mut ctx = Context::new();
        let summary = runner.run_step(&step, &mut ctx, &env).await;
        assert!(summary.is_ok());
        assert_eq!(summary.attempts, 1);
    }

    #[tokio::test]
    async fn test_unknown_type_fails_without_panicking() {
        let runner = runner_with_test_steps();
        let env = test_env(&runner, None);
        let mut ctx = Context::new();
        let summary = runner
            .run_step(&StepDef::new("x", "nope"), &mut ctx, &env)
            .await;
        assert_eq!(summary.reason, Some(FailureReason::RetryExhausted));
    }
}
