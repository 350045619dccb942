//! CLI command definitions for the `plotline` binary.

pub mod run;
pub mod trace;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use plotline_observe::LogFormat;

/// Run declarative step plots.
#[derive(Parser)]
#[command(name = "plotline", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format (pretty or json).
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a plot file.
    Run(RunArgs),

    /// Check a plot file without running it.
    Validate {
        /// Path to the plot (.json, .yaml or .yml).
        plot: PathBuf,
    },

    /// Filter the lines of a JSONL trace file.
    Trace {
        /// Trace file to read.
        file: PathBuf,

        /// Only this event type (e.g. step-fail).
        #[arg(long)]
        event: Option<String>,

        /// Only events for this step id.
        #[arg(long)]
        id: Option<String>,

        /// Only lines containing this text.
        #[arg(long)]
        contains: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to the plot (.json, .yaml or .yml).
    pub plot: PathBuf,

    /// Initial context as a JSON object.
    #[arg(long, conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Read the initial context from a JSON file.
    #[arg(long)]
    pub input_file: Option<PathBuf>,

    /// Run deadline in milliseconds (defaults to the configured value).
    #[arg(long)]
    pub max_duration_ms: Option<u64>,

    /// Stop before a step whose cost estimate would exceed this total.
    #[arg(long)]
    pub max_cost: Option<f64>,

    /// Trace id for logs and the trace file (defaults to a new UUIDv7).
    #[arg(long)]
    pub trace_id: Option<String>,

    /// Write a JSONL trace for this run.
    #[arg(long)]
    pub trace: bool,

    /// Engine configuration file (defaults to ./plotline.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Log filter for the verbosity flags.
pub fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info,plotline_core=debug",
        _ => "trace",
    }
}
