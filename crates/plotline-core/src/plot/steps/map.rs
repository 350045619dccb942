//! `map`: translate the value at `fromPath` through a lookup table.
//!
//! The looked-up value is converted to an object key first (`2` -> `"2"`,
//! `true` -> `"true"`, absent -> `"undefined"`). On a miss, `default` is
//! written if the inputs carry one; otherwise the target is left absent.

use serde::Deserialize;
use serde_json::{Map, Value};

use plotline_types::plot::StepDef;

use super::{parse_inputs, required_path};
use crate::plot::registry::{StepCall, StepError, StepHandler, StepOutcome, StepRegistry};
use crate::plot::value::property_key;

pub struct MapStep;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapInputs {
    from_path: String,
    mapping: Map<String, Value>,
    #[serde(default)]
    assign_to: Option<String>,
}

struct Resolved {
    from_path: String,
    assign_to: String,
    mapping: Map<String, Value>,
}

fn resolve(step: &StepDef) -> Result<Resolved, StepError> {
    let inputs: MapInputs = parse_inputs(step)?;
    let from_path = required_path(&inputs.from_path, "fromPath")?;
    let assign_to = inputs
        .assign_to
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| from_path.clone());
    Ok(Resolved {
        from_path,
        assign_to,
        mapping: inputs.mapping,
    })
}

impl StepHandler for MapStep {
    async fn execute(&self, call: StepCall<'_>) -> Result<StepOutcome, StepError> {
        let resolved = resolve(call.step)?;
        let key = property_key(call.ctx.get(&resolved.from_path));
        let mapped = resolved
            .mapping
            .get(&key)
            .or_else(|| call.step.inputs.get("default"))
            .cloned();
        tracing::debug!(
            from_path = %resolved.from_path,
            key = %key,
            hit = resolved.mapping.contains_key(&key),
            "map lookup"
        );
        call.ctx.set_or_clear(&resolved.assign_to, mapped);
        Ok(StepOutcome::default())
    }

    fn validate(&self, step: &StepDef, _registry: &StepRegistry) -> Result<(), StepError> {
        resolve(step).map(|_| ())
    }
}
