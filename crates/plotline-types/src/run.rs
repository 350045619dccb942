//! Run output types: per-step records, aggregate statistics and the closed
//! failure taxonomy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Status / reason
// ---------------------------------------------------------------------------

/// Terminal status of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Fail,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Ok => write!(f, "ok"),
            StepStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Why a step failed. This set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The run deadline elapsed before the step could start, or a
    /// per-attempt timeout fired.
    Timeout,
    /// The deadline (or cost budget) ran out while retries were pending.
    BudgetExceeded,
    /// No rate-limit token was available on the last attempt.
    RateLimit,
    /// The circuit breaker rejected the call.
    BreakerOpen,
    /// The handler kept failing until retries ran out.
    RetryExhausted,
    /// A fanout child failed under `stopOnFirstError`.
    FanoutFailed,
}

impl FailureReason {
    pub const ALL: [FailureReason; 6] = [
        FailureReason::Timeout,
        FailureReason::BudgetExceeded,
        FailureReason::RateLimit,
        FailureReason::BreakerOpen,
        FailureReason::RetryExhausted,
        FailureReason::FanoutFailed,
    ];

    /// Wire name, e.g. `"breaker-open"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::BudgetExceeded => "budget-exceeded",
            FailureReason::RateLimit => "rate-limit",
            FailureReason::BreakerOpen => "breaker-open",
            FailureReason::RetryExhausted => "retry-exhausted",
            FailureReason::FanoutFailed => "fanout-failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown failure reason: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

/// Outcome of one top-level step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Message of the last handler error, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// RunStats
// ---------------------------------------------------------------------------

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub steps: u32,
    pub ok: u32,
    pub failed: u32,
    pub retries: u32,
    pub total_ms: u64,
}

impl RunStats {
    /// Fold one step record into the counters.
    pub fn observe(&mut self, record: &StepRecord) {
        self.steps += 1;
        match record.status {
            StepStatus::Ok => self.ok += 1,
            StepStatus::Fail => self.failed += 1,
        }
        self.retries += record.attempts.saturating_sub(1);
    }
}

// ---------------------------------------------------------------------------
// RunRecord / budget
// ---------------------------------------------------------------------------

/// Full record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub plot_id: String,
    pub trace_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    /// Context as it stood when the run ended.
    #[serde(default)]
    pub final_context: Map<String, Value>,
}

/// What `run_plot` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub record: RunRecord,
    pub stats: RunStats,
}

impl RunReport {
    /// The record for a step id, if it ran.
    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.record.steps.iter().find(|s| s.id == step_id)
    }
}

/// Optional cost ceiling for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBudget {
    pub max_cost: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
