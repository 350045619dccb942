//! Plot orchestrator.
//!
//! `Engine::run_plot` walks the step graph from the first step: deadline
//! and cost-budget checks, then the step under its policies (see
//! `runner`), then one `StepRecord` and the successor. A failed step does
//! not stop the run; only an elapsed deadline or an exhausted cost budget
//! halt it early.
//!
//! Successor order: the handler's `next_step_id` (gate), then
//! `StepDef::next`, then the following step in declaration order. Failed
//! steps skip the handler override.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;

use plotline_types::config::EngineConfig;
use plotline_types::plot::{Plot, StepDef};
use plotline_types::run::{
    FailureReason, RunBudget, RunRecord, RunReport, RunStats, StepRecord, StepStatus,
};

use super::context::Context;
use super::definition::{validate_plot, PlotError};
use super::policy::PolicyState;
use super::registry::StepRegistry;
use super::runner::{RunEnv, StepRunner, StepSummary};
use super::trace::{NoopTraceSink, TraceEvent, TraceSink};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by `run_plot`. Step failures are never errors; they are
/// recorded on the run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid plot: {0}")]
    InvalidPlot(#[from] PlotError),
}

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Per-run options.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Initial context.
    pub input: Map<String, Value>,
    /// Run deadline; the engine's configured default applies when unset.
    pub max_duration: Option<Duration>,
    /// Trace id; a UUIDv7 is generated when unset.
    pub trace_id: Option<String>,
    pub budget: Option<RunBudget>,
    pub trace: Option<Arc<dyn TraceSink>>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }

    pub fn with_max_duration_ms(mut self, ms: u64) -> Self {
        self.max_duration = Some(Duration::from_millis(ms));
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_budget(mut self, max_cost: f64) -> Self {
        self.budget = Some(RunBudget { max_cost });
        self
    }

    pub fn with_trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs plots against one registry. Breaker and rate-limiter state live as
/// long as the engine and are shared by all of its runs.
pub struct Engine {
    runner: StepRunner,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: StepRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: StepRegistry, config: EngineConfig) -> Self {
        Self {
            runner: StepRunner::new(Arc::new(registry), Arc::new(PolicyState::new())),
            config,
        }
    }

    /// Engine over the built-in step types.
    pub fn with_builtins() -> Self {
        Self::new(StepRegistry::with_builtins())
    }

    pub fn registry(&self) -> &StepRegistry {
        self.runner.registry()
    }

    pub fn policies(&self) -> &PolicyState {
        self.runner.policies()
    }

    pub fn validate(&self, plot: &Plot) -> Result<(), PlotError> {
        validate_plot(plot, self.registry())
    }

    /// Execute `plot` to completion.
    pub async fn run_plot(&self, plot: &Plot, options: RunOptions) -> Result<RunReport, EngineError> {
        self.validate(plot)?;

        let run_start = Instant::now();
        let started_at = Utc::now();
        let max_duration = options
            .max_duration
            .unwrap_or_else(|| Duration::from_millis(self.config.default_max_duration_ms));
        let trace_id = options
            .trace_id
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let trace: Arc<dyn TraceSink> = options.trace.unwrap_or_else(|| Arc::new(NoopTraceSink));
        let env = RunEnv::new(
            self.runner.clone(),
            Some(run_start + max_duration),
            trace_id.clone(),
            trace,
        );

        tracing::info!(
            plot_id = %plot.id,
            trace_id = %trace_id,
            steps = plot.steps.len(),
            max_duration_ms = max_duration.as_millis() as u64,
            "starting plot run"
        );

        let mut ctx = Context::from(options.input);
        let mut records: Vec<StepRecord> = Vec::new();
        let mut stats = RunStats::default();
        let mut cost_spent = 0.0_f64;
        let mut cursor = Some(0usize);

        while let Some(index) = cursor {
            let step = &plot.steps[index];
            let step_start = Instant::now();
            env.emit(TraceEvent::StepStart {
                id: step.id.clone(),
            });

            if env.deadline_elapsed() {
                tracing::warn!(step_id = %step.id, "run deadline elapsed, halting");
                let record = fail_record(step, step_start, 0, FailureReason::Timeout, None);
                finish_step(&env, &mut stats, &mut records, record);
                break;
            }

            if let Some(budget) = &options.budget {
                let estimate = step.cost.map(|c| c.estimate).unwrap_or(0.0);
                if cost_spent + estimate > budget.max_cost {
                    tracing::warn!(
                        step_id = %step.id,
                        cost_spent,
                        estimate,
                        max_cost = budget.max_cost,
                        "cost budget exhausted, halting"
                    );
                    let record = fail_record(step, step_start, 0, FailureReason::BudgetExceeded, None);
                    finish_step(&env, &mut stats, &mut records, record);
                    break;
                }
                cost_spent += estimate;
            }

            let summary = self.runner.run_step(step, &mut ctx, &env).await;
            let preferred = match &summary.outcome {
                Some(outcome) => {
                    if outcome.fork_used {
                        if let Some(next_id) = &outcome.next_step_id {
                            env.emit(TraceEvent::Fork {
                                id: step.id.clone(),
                                next_id: next_id.clone(),
                            });
                        }
                    }
                    outcome.next_step_id.clone().or_else(|| step.next.clone())
                }
                None => step.next.clone(),
            };

            let record = summary_record(step, step_start, summary);
            finish_step(&env, &mut stats, &mut records, record);
            cursor = successor(plot, index, preferred.as_deref());
        }

        stats.total_ms = elapsed_ms(run_start);
        env.emit(TraceEvent::Done {
            stats: stats.clone(),
        });
        tracing::info!(
            plot_id = %plot.id,
            trace_id = %trace_id,
            steps = stats.steps,
            ok = stats.ok,
            failed = stats.failed,
            retries = stats.retries,
            total_ms = stats.total_ms,
            "plot run finished"
        );

        Ok(RunReport {
            record: RunRecord {
                plot_id: plot.id.clone(),
                trace_id,
                started_at,
                finished_at: Some(Utc::now()),
                steps: records,
                final_context: ctx.into_map(),
            },
            stats,
        })
    }
}

/// Run `plot` on a fresh engine over the built-in step types.
pub async fn run_plot(plot: &Plot, options: RunOptions) -> Result<RunReport, EngineError> {
    Engine::with_builtins().run_plot(plot, options).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn fail_record(
    step: &StepDef,
    started: Instant,
    attempts: u32,
    reason: FailureReason,
    error: Option<String>,
) -> StepRecord {
    StepRecord {
        id: step.id.clone(),
        step_type: step.step_type.clone(),
        status: StepStatus::Fail,
        duration_ms: elapsed_ms(started),
        attempts,
        reason: Some(reason),
        error,
    }
}

fn summary_record(step: &StepDef, started: Instant, summary: StepSummary) -> StepRecord {
    if summary.is_ok() {
        return StepRecord {
            id: step.id.clone(),
            step_type: step.step_type.clone(),
            status: StepStatus::Ok,
            duration_ms: elapsed_ms(started),
            attempts: summary.attempts,
            reason: None,
            error: None,
        };
    }
    let reason = summary.reason.unwrap_or(FailureReason::RetryExhausted);
    fail_record(step, started, summary.attempts, reason, summary.error)
}

fn finish_step(env: &RunEnv, stats: &mut RunStats, records: &mut Vec<StepRecord>, record: StepRecord) {
    match (record.status, record.reason) {
        (StepStatus::Fail, Some(reason)) => {
            tracing::warn!(
                step_id = %record.id,
                step_type = %record.step_type,
                attempts = record.attempts,
                %reason,
                error = record.error.as_deref().unwrap_or(""),
                "step failed"
            );
            env.emit(TraceEvent::StepFail {
                id: record.id.clone(),
                reason,
            });
        }
        _ => {
            tracing::debug!(
                step_id = %record.id,
                attempts = record.attempts,
                duration_ms = record.duration_ms,
                "step ok"
            );
            env.emit(TraceEvent::StepOk {
                id: record.id.clone(),
                duration_ms: record.duration_ms,
            });
        }
    }
    stats.observe(&record);
    records.push(record);
}

fn successor(plot: &Plot, index: usize, preferred: Option<&str>) -> Option<usize> {
    match preferred {
        Some(id) => {
            let position = plot.position(id);
            if position.is_none() {
                tracing::warn!(step_id = id, "successor not found, ending run");
            }
            position
        }
        None => (index + 1 < plot.steps.len()).then_some(index + 1),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
