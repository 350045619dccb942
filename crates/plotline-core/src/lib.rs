//! Plotline step-execution engine.
//!
//! Runs a declarative graph of typed steps (`Plot`) against a mutable JSON
//! context, wrapping each step in retry, circuit-breaker and rate-limit
//! policies under a run-level deadline. Depends only on `plotline-types`;
//! file-backed trace sinks and configuration loading live in
//! `plotline-infra`.

pub mod plot;

pub use plot::engine::{run_plot, Engine, EngineError, RunOptions};
pub use plot::registry::{StepCall, StepError, StepHandler, StepOutcome, StepRegistry};
