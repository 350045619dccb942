//! Plot domain types.
//!
//! A `Plot` is the declarative input to the engine: an ordered list of
//! `StepDef`s forming a graph through `next`, gate forks and declaration
//! order. Field names on the wire are camelCase (`backoffMs`,
//! `failThreshold`, `rateLimit`, ...), in both JSON and YAML.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Plot
// ---------------------------------------------------------------------------

/// A declarative graph of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plot {
    /// Plot identifier (free-form).
    pub id: String,
    /// Plot version string.
    #[serde(default)]
    pub version: String,
    /// Steps in declaration order. Execution starts at the first one.
    pub steps: Vec<StepDef>,
}

impl Plot {
    /// Position of the step with the given id in declaration order.
    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Look up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

// ---------------------------------------------------------------------------
// StepDef
// ---------------------------------------------------------------------------

/// A single node in a plot.
///
/// `inputs` is an open JSON object; each step type parses the fields it
/// needs. Sub-steps inside a fanout may omit `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
    /// Step id, unique within a plot.
    #[serde(default)]
    pub id: String,
    /// Registered handler name (`transform`, `map`, `gate`, `calc`, `fanout`, ...).
    #[serde(rename = "type")]
    pub step_type: String,
    /// Type-specific inputs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inputs: Map<String, Value>,
    /// Explicit successor step id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Gate-only branching override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork: Option<ForkSpec>,
    /// Retry policy (absent = a single attempt).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Circuit breaker policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerPolicy>,
    /// Rate limit policy, shared by key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitPolicy>,
    /// Per-attempt handler timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Cost estimate counted against the run's cost budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostEstimate>,
}

impl StepDef {
    /// Create a bare step of the given type with no inputs or policies.
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            inputs: Map::new(),
            next: None,
            fork: None,
            retry: None,
            breaker: None,
            rate_limit: None,
            timeout_ms: None,
            cost: None,
        }
    }

    /// Builder-style setter for `inputs`. Non-object values are ignored.
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        if let Value::Object(map) = inputs {
            self.inputs = map;
        }
        self
    }

    /// Builder-style setter for `next`.
    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// Name used for policy keys and log fields: the id, or the type for
    /// anonymous sub-steps.
    pub fn label(&self) -> &str {
        if self.id.is_empty() {
            &self.step_type
        } else {
            &self.id
        }
    }

    /// Key under which this step's breaker state is stored.
    pub fn breaker_key(&self) -> String {
        self.breaker
            .as_ref()
            .and_then(|b| b.key.clone())
            .unwrap_or_else(|| self.label().to_string())
    }
}

// ---------------------------------------------------------------------------
// Fork
// ---------------------------------------------------------------------------

/// Gate branching: a `${path} OP literal` condition and the two targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkSpec {
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_true: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_false: Option<String>,
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// How successive backoff delays are derived from `backoffMs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `backoffMs[min(attempt-1, len-1)]`.
    #[default]
    Fixed,
    /// `backoffMs[0] * 2^(attempt-1)`, capped at `maxBackoffMs`.
    Exponential,
}

/// Retry configuration for a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    #[serde(default)]
    pub max: u32,
    /// Delay schedule in milliseconds.
    #[serde(default)]
    pub backoff_ms: Vec<u64>,
    /// Scale each delay by a factor in [0, 1).
    #[serde(default)]
    pub jitter: bool,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Upper bound for exponential delays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
}

impl RetryPolicy {
    /// Total attempts allowed: the first one plus `max` retries.
    pub fn max_attempts(&self) -> u32 {
        self.max.saturating_add(1)
    }
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

/// Circuit breaker configuration for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerPolicy {
    /// Consecutive failures that open the circuit (default 3).
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
    /// Time spent open before trial calls are admitted (default 30s).
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Consecutive half-open successes required to close (default 1).
    #[serde(default = "default_half_open_max")]
    pub half_open_max: u32,
    /// Shared breaker key; defaults to the step id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

fn default_fail_threshold() -> u32 {
    3
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_half_open_max() -> u32 {
    1
}

impl BreakerPolicy {
    pub fn new(fail_threshold: u32, cooldown_ms: u64, half_open_max: u32) -> Self {
        Self {
            fail_threshold,
            cooldown_ms,
            half_open_max,
            key: None,
        }
    }

    /// Copy with every numeric field clamped to at least 1.
    pub fn normalized(&self) -> Self {
        Self {
            fail_threshold: self.fail_threshold.max(1),
            cooldown_ms: self.cooldown_ms.max(1),
            half_open_max: self.half_open_max.max(1),
            key: self.key.clone(),
        }
    }
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self::new(
            default_fail_threshold(),
            default_cooldown_ms(),
            default_half_open_max(),
        )
    }
}

// ---------------------------------------------------------------------------
// Rate limit / cost
// ---------------------------------------------------------------------------

/// Fixed-window rate limit shared by every step using the same `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    pub key: String,
    pub limit: u32,
    pub interval_ms: u64,
}

/// Estimated cost of a step, counted against `RunBudget::max_cost`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    #[serde(default)]
    pub estimate: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
