//! Built-in step handlers.
//!
//! Each handler parses the fields it needs out of `StepDef::inputs` with
//! serde; malformed inputs surface as `StepError::InvalidInput` both when
//! a plot is validated and when the step runs.

mod calc;
mod fanout;
mod gate;
mod map;
mod transform;

pub use calc::CalcStep;
pub use fanout::FanoutStep;
pub use gate::GateStep;
pub use map::MapStep;
pub use transform::TransformStep;

use serde::de::DeserializeOwned;
use serde_json::Value;

use plotline_types::plot::StepDef;

use super::registry::StepError;

/// Deserialize `step.inputs` into a typed input struct.
fn parse_inputs<T: DeserializeOwned>(step: &StepDef) -> Result<T, StepError> {
    serde_json::from_value(Value::Object(step.inputs.clone()))
        .map_err(|e| StepError::invalid_input(format!("{}: {e}", step.step_type)))
}

/// Trimmed, non-empty string field.
fn required_path(value: &str, field: &str) -> Result<String, StepError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StepError::invalid_input(format!("{field} required")));
    }
    Ok(trimmed.to_string())
}
