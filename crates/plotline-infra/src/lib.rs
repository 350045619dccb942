//! Infrastructure layer for Plotline.
//!
//! Implementations of the ports defined in `plotline-core` that touch the
//! outside world: the JSONL trace file sink and the `plotline.toml`
//! configuration loader with its environment overrides.

pub mod config;
pub mod trace;
