//! `gate`: choose the next step.
//!
//! With a `fork`, the compiled `${path} OP literal` condition picks
//! `onTrue`/`onFalse`. Otherwise the four-field form `{path, op, value,
//! onTrue, onFalse}` compares the context value at `path` with `value`.
//! An unrecognised `op` compares false, and an absent `value` only equals
//! an absent context value. No matching branch leaves traversal to the
//! default successor.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;

use plotline_types::plot::StepDef;

use crate::plot::predicate::{CompareOp, Predicate};
use crate::plot::registry::{StepCall, StepError, StepHandler, StepOutcome, StepRegistry};

/// Gate handler. Compiled fork conditions are cached by source text.
#[derive(Default)]
pub struct GateStep {
    compiled: DashMap<String, Arc<Predicate>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompareInputs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    on_true: Option<String>,
    #[serde(default)]
    on_false: Option<String>,
}

impl GateStep {
    pub fn new() -> Self {
        Self::default()
    }

    fn predicate(&self, condition: &str) -> Result<Arc<Predicate>, StepError> {
        if let Some(hit) = self.compiled.get(condition) {
            return Ok(Arc::clone(hit.value()));
        }
        let compiled = Arc::new(
            Predicate::compile(condition).map_err(|e| StepError::invalid_input(e.to_string()))?,
        );
        self.compiled
            .insert(condition.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Number of distinct conditions compiled so far.
    pub fn cached(&self) -> usize {
        self.compiled.len()
    }
}

/// Four-field comparison, when `path` and `op` are both present. The op is
/// `None` when it is not one of the known operators.
fn compare_form(
    step: &StepDef,
) -> Result<Option<(String, Option<CompareOp>, CompareInputs)>, StepError> {
    let inputs: CompareInputs = super::parse_inputs(step)?;
    let (Some(path), Some(op)) = (inputs.path.clone(), inputs.op.clone()) else {
        return Ok(None);
    };
    if path.is_empty() || op.is_empty() {
        return Ok(None);
    }
    Ok(Some((path, op.parse::<CompareOp>().ok(), inputs)))
}

fn compare(op: Option<CompareOp>, left: Option<&Value>, right: Option<&Value>) -> bool {
    match (op, right) {
        (None, _) => false,
        (Some(op), Some(right)) => op.apply(left, right),
        (Some(CompareOp::StrictEq), None) => left.is_none(),
        (Some(CompareOp::StrictNe), None) => left.is_some(),
        // An absent value coerces to NaN.
        (Some(_), None) => false,
    }
}

impl StepHandler for GateStep {
    async fn execute(&self, call: StepCall<'_>) -> Result<StepOutcome, StepError> {
        if let Some(fork) = &call.step.fork {
            let passed = self.predicate(&fork.condition)?.evaluate(call.ctx);
            let next_step_id = if passed {
                fork.on_true.clone()
            } else {
                fork.on_false.clone()
            };
            tracing::debug!(
                step_id = call.step.label(),
                condition = %fork.condition,
                passed,
                "gate fork evaluated"
            );
            return Ok(StepOutcome {
                next_step_id,
                fork_used: true,
            });
        }

        let Some((path, op, inputs)) = compare_form(call.step)? else {
            return Ok(StepOutcome::default());
        };
        if op.is_none() {
            tracing::debug!(step_id = call.step.label(), op = ?inputs.op, "unknown gate op compares false");
        }
        let passed = compare(op, call.ctx.get(&path), call.step.inputs.get("value"));
        let next_step_id = if passed { inputs.on_true } else { inputs.on_false };
        Ok(StepOutcome {
            next_step_id,
            fork_used: false,
        })
    }

    fn validate(&self, step: &StepDef, _registry: &StepRegistry) -> Result<(), StepError> {
        if let Some(fork) = &step.fork {
            return self.predicate(&fork.condition).map(|_| ());
        }
        compare_form(step).map(|_| ())
    }
}
