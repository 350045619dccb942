//! Trace events emitted while a plot runs, and the sink port they go to.
//!
//! The core never touches the filesystem; `plotline-infra` provides the
//! JSONL file sink. Sinks must not fail the run, so `emit` returns nothing.

use std::sync::Mutex;

use serde::Serialize;

use plotline_types::run::{FailureReason, RunStats};

/// One trace event. Serialized with an `ev` tag, e.g.
/// `{"ev":"step-ok","id":"u1","durationMs":3}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "ev", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum TraceEvent {
    StepStart {
        id: String,
    },
    Retry {
        id: String,
        attempt: u32,
        delay_ms: u64,
    },
    StepOk {
        id: String,
        duration_ms: u64,
    },
    StepFail {
        id: String,
        reason: FailureReason,
    },
    Fork {
        id: String,
        next_id: String,
    },
    Done {
        stats: RunStats,
    },
}

impl TraceEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::StepStart { .. } => "step-start",
            TraceEvent::Retry { .. } => "retry",
            TraceEvent::StepOk { .. } => "step-ok",
            TraceEvent::StepFail { .. } => "step-fail",
            TraceEvent::Fork { .. } => "fork",
            TraceEvent::Done { .. } => "done",
        }
    }
}

/// Destination for trace events.
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: &TraceEvent);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn emit(&self, _event: &TraceEvent) {}
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(TraceEvent::name).collect()
    }
}

impl TraceSink for MemoryTraceSink {
    fn emit(&self, event: &TraceEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Closures are sinks, for callers that only want to observe.
impl<F> TraceSink for F
where
    F: Fn(&TraceEvent) + Send + Sync,
{
    fn emit(&self, event: &TraceEvent) {
        self(event)
    }
}
