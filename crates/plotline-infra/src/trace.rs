//! JSONL trace files.
//!
//! One file per run, `trace-<timestamp>-<traceId>.jsonl`, one JSON object
//! per line. Characters of the trace id other than ASCII letters, digits,
//! `-` and `_` become `_` in the file name. Every line carries `ev` (the event name) and `ts` (RFC 3339).
//! Write failures are logged and swallowed: tracing never fails a run.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use plotline_core::plot::trace::{TraceEvent, TraceSink};
use plotline_types::config::TraceSettings;

/// Appends trace events to a per-run JSONL file.
pub struct JsonlTraceWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlTraceWriter {
    /// Create `dir` if needed and open a fresh trace file for `trace_id`.
    pub fn create(dir: &Path, trace_id: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let path = dir.join(format!("trace-{stamp}-{}.jsonl", file_safe_id(trace_id)));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "trace file opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &TraceEvent) -> io::Result<()> {
        let mut record = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            other => {
                return Err(io::Error::other(format!(
                    "trace event serialized to a non-object: {other}"
                )));
            }
        };
        record.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("trace file lock poisoned"))?;
        file.write_all(line.as_bytes())
    }
}

fn file_safe_id(trace_id: &str) -> String {
    trace_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl TraceSink for JsonlTraceWriter {
    fn emit(&self, event: &TraceEvent) {
        if let Err(e) = self.append(event) {
            tracing::warn!(
                path = %self.path.display(),
                event = event.name(),
                error = %e,
                "failed to write trace event"
            );
        }
    }
}

/// Trace sink for a run, or `None` when tracing is off or the file could
/// not be created.
pub fn tracer_from_settings(settings: &TraceSettings, trace_id: &str) -> Option<Arc<JsonlTraceWriter>> {
    if !settings.enabled {
        return None;
    }
    match JsonlTraceWriter::create(&settings.dir, trace_id) {
        Ok(writer) => Some(Arc::new(writer)),
        Err(e) => {
            tracing::warn!(
                dir = %settings.dir.display(),
                error = %e,
                "could not create trace file, tracing disabled for this run"
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Reading traces back
// ---------------------------------------------------------------------------

/// Line filter for trace files. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceFilter {
    /// Event name, e.g. `step-fail`.
    pub event: Option<String>,
    /// Step id.
    pub id: Option<String>,
    /// Substring of the raw line.
    pub contains: Option<String>,
}

impl TraceFilter {
    /// Whether a raw trace line passes. Lines that are not JSON never do.
    pub fn matches(&self, line: &str) -> bool {
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            return false;
        };
        let field = |name: &str| record.get(name).and_then(Value::as_str).unwrap_or("");
        if self.event.as_deref().is_some_and(|ev| field("ev") != ev) {
            return false;
        }
        if self.id.as_deref().is_some_and(|id| field("id") != id) {
            return false;
        }
        if self
            .contains
            .as_deref()
            .is_some_and(|needle| !line.contains(needle))
        {
            return false;
        }
        true
    }
}

/// Lines of the trace file at `path` that pass `filter`, in file order.
pub fn filter_trace_file(path: &Path, filter: &TraceFilter) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if filter.matches(&line) {
            lines.push(line);
        }
    }
    Ok(lines)
}
