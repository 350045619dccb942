//! `calc`: evaluate an arithmetic expression and store it at `assignTo`.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use plotline_types::plot::StepDef;

use super::{parse_inputs, required_path};
use crate::plot::expression::{CompiledExpr, ExpressionError, VarResolver};
use crate::plot::registry::{StepCall, StepError, StepHandler, StepOutcome, StepRegistry};
use crate::plot::value::number_value;

/// Calc handler. Expressions are compiled once per distinct source.
#[derive(Default)]
pub struct CalcStep {
    compiled: DashMap<String, Arc<CompiledExpr>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalcInputs {
    assign_to: String,
    expr: String,
    #[serde(default)]
    vars: Option<Map<String, Value>>,
}

impl CalcStep {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, source: &str) -> Result<Arc<CompiledExpr>, ExpressionError> {
        if let Some(hit) = self.compiled.get(source) {
            return Ok(Arc::clone(hit.value()));
        }
        let compiled = Arc::new(CompiledExpr::compile(source)?);
        self.compiled
            .insert(source.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Number of distinct expressions compiled so far.
    pub fn cached(&self) -> usize {
        self.compiled.len()
    }
}

fn parse(step: &StepDef) -> Result<(String, String, Option<Map<String, Value>>), StepError> {
    let inputs: CalcInputs = parse_inputs(step)?;
    let assign_to = required_path(&inputs.assign_to, "assignTo")?;
    let expr = required_path(&inputs.expr, "expr")?;
    Ok((assign_to, expr, inputs.vars))
}

impl StepHandler for CalcStep {
    async fn execute(&self, call: StepCall<'_>) -> Result<StepOutcome, StepError> {
        let (assign_to, source, vars) = parse(call.step)?;
        let expr = self.compile(&source)?;
        let result = expr.evaluate(&VarResolver::new(call.ctx, vars.as_ref()))?;
        let value = number_value(result).ok_or_else(|| ExpressionError::NotANumber(assign_to.clone()))?;
        tracing::debug!(step_id = call.step.label(), expr = %source, %value, "calc evaluated");
        call.ctx.set(&assign_to, value);
        Ok(StepOutcome::default())
    }

    fn validate(&self, step: &StepDef, _registry: &StepRegistry) -> Result<(), StepError> {
        let (_, source, _) = parse(step)?;
        self.compile(&source)?;
        Ok(())
    }
}
