//! `plotline trace`: print the matching lines of a JSONL trace file.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use plotline_infra::trace::{filter_trace_file, TraceFilter};

pub fn handle_trace(file: &Path, filter: TraceFilter, json: bool) -> Result<()> {
    let lines = filter_trace_file(file, &filter)
        .with_context(|| format!("Failed to read trace file {}", file.display()))?;

    if json {
        let events: Vec<Value> = lines
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        println!("{}", serde_json::to_string_pretty(&events)?);
    } else {
        for line in &lines {
            println!("{line}");
        }
    }
    Ok(())
}
