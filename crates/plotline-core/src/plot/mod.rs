//! Plot engine core: context, step dispatch, resilience policies and the
//! orchestrator.
//!
//! - `context` -- dot-path addressable JSON context threaded through steps
//! - `value` -- loose comparison and number coercion shared by steps
//! - `expression` -- arithmetic compiler/evaluator behind the `calc` step
//! - `predicate` -- `${path} OP literal` conditions for gate forks
//! - `registry` -- step handler trait, type-erased registry
//! - `steps` -- built-in handlers (transform, map, gate, calc, fanout)
//! - `backoff`, `breaker`, `rate_limit`, `policy` -- resilience state machines
//! - `runner` -- one step under its retry/breaker/rate-limit policies
//! - `engine` -- graph traversal, deadline, records and statistics
//! - `definition` -- JSON/YAML loading and structural validation
//! - `trace` -- trace event model and sinks

pub mod backoff;
pub mod breaker;
pub mod context;
pub mod definition;
pub mod engine;
pub mod expression;
pub mod policy;
pub mod predicate;
pub mod rate_limit;
pub mod registry;
pub mod runner;
pub mod steps;
pub mod trace;
pub mod value;

#[cfg(test)]
mod conformance_tests;
#[cfg(test)]
pub(crate) mod test_support;
