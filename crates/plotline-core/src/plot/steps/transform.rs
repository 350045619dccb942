//! `transform`: shallow-merge `inputs.assign` into the context.

use serde_json::Value;

use plotline_types::plot::StepDef;

use crate::plot::registry::{StepCall, StepError, StepHandler, StepOutcome, StepRegistry};

pub struct TransformStep;

fn assign_of(step: &StepDef) -> Result<Option<&serde_json::Map<String, Value>>, StepError> {
    match step.inputs.get("assign") {
        None => Ok(None),
        Some(Value::Object(assign)) => Ok(Some(assign)),
        Some(_) => Err(StepError::invalid_input("assign must be an object")),
    }
}

impl StepHandler for TransformStep {
    async fn execute(&self, call: StepCall<'_>) -> Result<StepOutcome, StepError> {
        if let Some(assign) = assign_of(call.step)? {
            call.ctx.merge(assign);
        }
        Ok(StepOutcome::default())
    }

    fn validate(&self, step: &StepDef, _registry: &StepRegistry) -> Result<(), StepError> {
        assign_of(step).map(|_| ())
    }
}
