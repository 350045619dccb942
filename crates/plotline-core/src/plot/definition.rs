//! Plot definition parsing, loading and validation.
//!
//! Plots are authored as JSON or YAML. Parsing is purely syntactic;
//! `validate_plot` checks the structure against a registry, since which step
//! types exist (and what inputs they need) depends on the handlers.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

use plotline_types::plot::Plot;

use super::predicate::Predicate;
use super::registry::StepRegistry;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PlotError {
    /// JSON/YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Plot-level structural problem (empty plot, blank or duplicate ids).
    #[error("validation error: {0}")]
    Validation(String),

    #[error("step '{step_id}': unknown step type '{step_type}'")]
    UnknownStepType { step_id: String, step_type: String },

    #[error("step '{step_id}': {field} references unknown step '{target}'")]
    UnknownSuccessor {
        step_id: String,
        field: &'static str,
        target: String,
    },

    #[error("step '{step_id}': invalid fork condition: {message}")]
    InvalidCondition { step_id: String, message: String },

    #[error("step '{step_id}': {message}")]
    InvalidInput { step_id: String, message: String },

    #[error("unsupported plot file extension: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_plot_json(json: &str) -> Result<Plot, PlotError> {
    serde_json::from_str(json).map_err(|e| PlotError::Parse(e.to_string()))
}

pub fn parse_plot_yaml(yaml: &str) -> Result<Plot, PlotError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| PlotError::Parse(e.to_string()))
}

/// Load a plot, choosing the parser by extension (`.json`, `.yaml`, `.yml`).
pub fn load_plot_file(path: &Path) -> Result<Plot, PlotError> {
    let format = plot_format(path)
        .ok_or_else(|| PlotError::UnsupportedFormat(path.display().to_string()))?;
    let content = std::fs::read_to_string(path)?;
    match format {
        PlotFormat::Json => parse_plot_json(&content),
        PlotFormat::Yaml => parse_plot_yaml(&content),
    }
}

enum PlotFormat {
    Json,
    Yaml,
}

fn plot_format(path: &Path) -> Option<PlotFormat> {
    match path.extension()?.to_str()? {
        "json" => Some(PlotFormat::Json),
        "yaml" | "yml" => Some(PlotFormat::Yaml),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check that `plot` can run against `registry`.
///
/// Checks:
/// - At least one step exists
/// - Step ids are non-empty and unique
/// - Every step type is registered
/// - `next`, `fork.onTrue/onFalse` and gate `onTrue/onFalse` point at
///   existing steps
/// - Fork conditions compile
/// - Each handler accepts its step's inputs
pub fn validate_plot(plot: &Plot, registry: &StepRegistry) -> Result<(), PlotError> {
    if plot.steps.is_empty() {
        return Err(PlotError::Validation(format!(
            "plot '{}' must have at least one step",
            plot.id
        )));
    }

    let mut ids = HashSet::new();
    for (i, step) in plot.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(PlotError::Validation(format!("steps[{i}] has an empty id")));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(PlotError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    for step in &plot.steps {
        let handler = registry
            .get(&step.step_type)
            .ok_or_else(|| PlotError::UnknownStepType {
                step_id: step.id.clone(),
                step_type: step.step_type.clone(),
            })?;

        let successor_refs = [
            ("next", step.next.as_deref()),
            ("fork.onTrue", step.fork.as_ref().and_then(|f| f.on_true.as_deref())),
            ("fork.onFalse", step.fork.as_ref().and_then(|f| f.on_false.as_deref())),
            ("inputs.onTrue", step.inputs.get("onTrue").and_then(|v| v.as_str())),
            ("inputs.onFalse", step.inputs.get("onFalse").and_then(|v| v.as_str())),
        ];
        for (field, target) in successor_refs {
            if let Some(target) = target {
                if !ids.contains(target) {
                    return Err(PlotError::UnknownSuccessor {
                        step_id: step.id.clone(),
                        field,
                        target: target.to_string(),
                    });
                }
            }
        }

        if let Some(fork) = &step.fork {
            Predicate::compile(&fork.condition).map_err(|e| PlotError::InvalidCondition {
                step_id: step.id.clone(),
                message: e.to_string(),
            })?;
        }

        handler
            .validate_dyn(step, registry)
            .map_err(|e| PlotError::InvalidInput {
                step_id: step.id.clone(),
                message: e.to_string(),
            })?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
