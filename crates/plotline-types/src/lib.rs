//! Shared data model for Plotline.
//!
//! Plots and step definitions (the declarative input), run records and
//! statistics (the output), and the engine configuration file format.
//!
//! Zero runtime dependencies beyond serde, serde_json and chrono.

pub mod config;
pub mod plot;
pub mod run;
