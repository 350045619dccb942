//! Engine configuration file format.
//!
//! `EngineConfig` represents `plotline.toml`. Every field has a default, so
//! an empty file (or no file at all) is a valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run deadline applied when a run does not set `maxDurationMs`.
    #[serde(default = "default_max_duration_ms")]
    pub default_max_duration_ms: u64,

    /// JSONL trace side channel.
    #[serde(default)]
    pub trace: TraceSettings,
}

fn default_max_duration_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_duration_ms: default_max_duration_ms(),
            trace: TraceSettings::default(),
        }
    }
}

/// Where and whether run traces are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Directory receiving one `trace-*.jsonl` file per run.
    #[serde(default = "default_trace_dir")]
    pub dir: PathBuf,
}

fn default_trace_dir() -> PathBuf {
    PathBuf::from("reports/traces")
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_trace_dir(),
        }
    }
}
