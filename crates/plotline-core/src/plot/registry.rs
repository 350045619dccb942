//! Step handlers and the registry that dispatches on `StepDef::step_type`.
//!
//! Same split as any RPITIT trait that must live behind `dyn`:
//! 1. [`StepHandler`] is the ergonomic trait (native `async fn` in impls)
//! 2. [`StepHandlerDyn`] is its object-safe twin with boxed futures
//! 3. A blanket impl bridges the two, so registering any `StepHandler`
//!    stores it as `Arc<dyn StepHandlerDyn>`

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use plotline_types::plot::StepDef;
use plotline_types::run::FailureReason;

use super::context::Context;
use super::expression::ExpressionError;
use super::runner::RunEnv;
use super::steps::{CalcStep, FanoutStep, GateStep, MapStep, TransformStep};

// ---------------------------------------------------------------------------
// Handler I/O
// ---------------------------------------------------------------------------

/// Everything a handler sees for one attempt.
pub struct StepCall<'a> {
    pub ctx: &'a mut Context,
    pub step: &'a StepDef,
    pub env: &'a RunEnv,
}

/// What a successful attempt returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Overrides `StepDef::next` when set.
    pub next_step_id: Option<String>,
    /// The step branched through its `fork` condition.
    pub fork_used: bool,
}

impl StepOutcome {
    pub fn goto(next_step_id: impl Into<String>) -> Self {
        Self {
            next_step_id: Some(next_step_id.into()),
            fork_used: false,
        }
    }
}

/// Errors raised by handlers. All of them are caught by the runner and
/// classified into a [`FailureReason`].
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("BAD_INPUT: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("fanout-failed: {failed} of {total} items failed")]
    FanoutFailed { failed: usize, total: usize },

    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        StepError::InvalidInput(message.into())
    }

    /// Reason recorded when this error ends the step.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            StepError::FanoutFailed { .. } => FailureReason::FanoutFailed,
            _ => FailureReason::RetryExhausted,
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A step type's behavior.
///
/// Uses RPITIT (native async fn in traits, Rust 2024), so it is not object
/// safe; see [`StepHandlerDyn`].
pub trait StepHandler: Send + Sync {
    /// Run one attempt against the context.
    fn execute(
        &self,
        call: StepCall<'_>,
    ) -> impl Future<Output = Result<StepOutcome, StepError>> + Send;

    /// Structural check of `step.inputs`, run when a plot is validated.
    fn validate(&self, _step: &StepDef, _registry: &StepRegistry) -> Result<(), StepError> {
        Ok(())
    }
}

/// Object-safe version of [`StepHandler`] with boxed futures.
pub trait StepHandlerDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        call: StepCall<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, StepError>> + Send + 'a>>;

    fn validate_dyn(&self, step: &StepDef, registry: &StepRegistry) -> Result<(), StepError>;
}

impl<T: StepHandler> StepHandlerDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        call: StepCall<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, StepError>> + Send + 'a>> {
        Box::pin(self.execute(call))
    }

    fn validate_dyn(&self, step: &StepDef, registry: &StepRegistry) -> Result<(), StepError> {
        StepHandler::validate(self, step, registry)
    }
}

// ---------------------------------------------------------------------------
// StepRegistry
// ---------------------------------------------------------------------------

/// Step type name -> handler.
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandlerDyn>>,
}

impl StepRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `transform`, `map`, `gate`, `calc` and `fanout`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("transform", TransformStep);
        registry.register("map", MapStep);
        registry.register("gate", GateStep::new());
        registry.register("calc", CalcStep::new());
        registry.register("fanout", FanoutStep);
        registry
    }

    /// Register a handler, replacing any previous one for `step_type`.
    pub fn register<H: StepHandler + 'static>(&mut self, step_type: impl Into<String>, handler: H) {
        self.register_arc(step_type, Arc::new(handler));
    }

    pub fn register_arc(&mut self, step_type: impl Into<String>, handler: Arc<dyn StepHandlerDyn>) {
        let step_type = step_type.into();
        if self.handlers.insert(step_type.clone(), handler).is_some() {
            tracing::debug!(step_type = %step_type, "replaced step handler");
        }
    }

    pub fn get(&self, step_type: &str) -> Option<&Arc<dyn StepHandlerDyn>> {
        self.handlers.get(step_type)
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Registered type names, sorted.
    pub fn step_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl StepHandler for Noop {
        async fn execute(&self, _call: StepCall<'_>) -> Result<StepOutcome, StepError> {
            Ok(StepOutcome::goto("elsewhere"))
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = StepRegistry::with_builtins();
        assert_eq!(
            registry.step_types(),
            vec!["calc", "fanout", "gate", "map", "transform"]
        );
        assert!(StepRegistry::new().step_types().is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = StepRegistry::with_builtins();
        registry.register("custom", Noop);
        registry.register("transform", Noop);
        assert!(registry.contains("custom"));
        assert_eq!(registry.step_types().len(), 6);
        assert!(registry.get("missing").is_none());
        assert!(format!("{registry:?}").contains("custom"));
    }

    #[test]
    fn test_failure_reason_classification() {
        assert_eq!(
            StepError::FanoutFailed { failed: 1, total: 3 }.failure_reason(),
            FailureReason::FanoutFailed
        );
        assert_eq!(
            StepError::failed("boom").failure_reason(),
            FailureReason::RetryExhausted
        );
        assert_eq!(
            StepError::from(ExpressionError::DivisionByZero).to_string(),
            "DIV_ZERO"
        );
    }
}
