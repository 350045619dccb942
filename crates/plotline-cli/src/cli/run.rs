//! `plotline run` and `plotline validate`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::{Map, Value};

use plotline_core::plot::definition::{load_plot_file, validate_plot};
use plotline_core::{Engine, RunOptions, StepRegistry};
use plotline_infra::config::load_config;
use plotline_infra::trace::tracer_from_settings;
use plotline_types::run::{RunReport, StepRecord, StepStatus};

use super::RunArgs;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(args: RunArgs, json: bool) -> Result<()> {
    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if args.trace {
        config.trace.enabled = true;
    }
    tracing::debug!(
        trace_enabled = config.trace.enabled,
        trace_dir = %config.trace.dir.display(),
        default_max_duration_ms = config.default_max_duration_ms,
        "configuration loaded"
    );

    let plot = load_plot_file(&args.plot)
        .with_context(|| format!("Failed to load plot {}", args.plot.display()))?;
    let input = read_input(args.input.as_deref(), args.input_file.as_deref())?;
    let trace_id = args
        .trace_id
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    let mut options = RunOptions::new()
        .with_input(input)
        .with_trace_id(trace_id.clone());
    if let Some(ms) = args.max_duration_ms {
        options = options.with_max_duration_ms(ms);
    }
    if let Some(max_cost) = args.max_cost {
        options = options.with_budget(max_cost);
    }
    let tracer = tracer_from_settings(&config.trace, &trace_id);
    if let Some(tracer) = &tracer {
        tracing::info!(path = %tracer.path().display(), "writing run trace");
        options = options.with_trace(tracer.clone());
    }

    tracing::info!(plot_id = %plot.id, trace_id = %trace_id, steps = plot.steps.len(), "running plot");

    let engine = Engine::with_config(StepRegistry::with_builtins(), config);
    let report = engine
        .run_plot(&plot, options)
        .await
        .with_context(|| format!("Plot '{}' is not runnable", plot.id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report);
    if let Some(tracer) = &tracer {
        println!(
            "  Trace: {}",
            style(tracer.path().display()).dim()
        );
        println!();
    }
    Ok(())
}

fn read_input(inline: Option<&str>, file: Option<&Path>) -> Result<Map<String, Value>> {
    let raw = match (inline, file) {
        (Some(inline), _) => inline.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display()))?,
        (None, None) => return Ok(Map::new()),
    };
    match serde_json::from_str::<Value>(&raw).context("Input is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("Input must be a JSON object, got {other}"),
    }
}

fn print_report(report: &RunReport) {
    let stats = &report.stats;
    let headline = if stats.failed == 0 {
        style("*").green().bold()
    } else {
        style("!").yellow().bold()
    };

    println!();
    println!(
        "  {} Plot '{}' finished in {}ms",
        headline,
        style(&report.record.plot_id).cyan(),
        stats.total_ms
    );
    println!("  Trace ID: {}", style(&report.record.trace_id).dim());
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Reason"),
        ]);

    for rec in &report.record.steps {
        table.add_row(vec![
            Cell::new(&rec.id),
            Cell::new(&rec.step_type),
            format_status(rec),
            Cell::new(rec.attempts),
            Cell::new(format!("{}ms", rec.duration_ms)),
            Cell::new(failure_detail(rec)),
        ]);
    }

    println!("{table}");
    println!();
    println!(
        "  Steps: {}  Ok: {}  Failed: {}  Retries: {}",
        stats.steps,
        style(stats.ok).green(),
        if stats.failed > 0 {
            style(stats.failed).red()
        } else {
            style(stats.failed).dim()
        },
        stats.retries
    );
    println!();
}

fn format_status(rec: &StepRecord) -> Cell {
    match rec.status {
        StepStatus::Ok => Cell::new("ok").fg(Color::Green),
        StepStatus::Fail => Cell::new("fail").fg(Color::Red),
    }
}

fn failure_detail(rec: &StepRecord) -> String {
    match (&rec.reason, &rec.error) {
        (Some(reason), Some(error)) => format!("{reason}: {error}"),
        (Some(reason), None) => reason.to_string(),
        _ => "-".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(path: &Path, json: bool) -> Result<()> {
    let plot = load_plot_file(path)
        .with_context(|| format!("Failed to load plot {}", path.display()))?;
    validate_plot(&plot, &StepRegistry::with_builtins())
        .with_context(|| format!("Plot '{}' failed validation", plot.id))?;

    if json {
        let out = serde_json::json!({
            "plot": plot.id,
            "version": plot.version,
            "steps": plot.steps.len(),
            "valid": true,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Plot '{}' is valid ({} steps)",
            style("*").green().bold(),
            style(&plot.id).cyan(),
            plot.steps.len()
        );
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotline_types::run::FailureReason;
    use serde_json::json;

    #[test]
    fn read_input_variants() {
        assert!(read_input(None, None).unwrap().is_empty());
        assert_eq!(read_input(Some("{\"n\": 2}"), None).unwrap()["n"], json!(2));
        assert!(read_input(Some("[1]"), None).is_err());
        assert!(read_input(Some("{"), None).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, "{\"tier\": \"a\"}").unwrap();
        assert_eq!(read_input(None, Some(&path)).unwrap()["tier"], json!("a"));
        assert!(read_input(None, Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn failure_detail_text() {
        let mut rec = StepRecord {
            id: "c".into(),
            step_type: "calc".into(),
            status: StepStatus::Fail,
            duration_ms: 0,
            attempts: 1,
            reason: Some(FailureReason::RetryExhausted),
            error: Some("DIV_ZERO".into()),
        };
        assert_eq!(failure_detail(&rec), "retry-exhausted: DIV_ZERO");
        rec.error = None;
        assert_eq!(failure_detail(&rec), "retry-exhausted");
        rec.reason = None;
        assert_eq!(failure_detail(&rec), "-");
    }

    #[tokio::test]
    async fn run_with_trace_writes_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let traces = dir.path().join("traces");
        let config = dir.path().join("plotline.toml");
        std::fs::write(
            &config,
            format!("[trace]\nenabled = true\ndir = \"{}\"\n", traces.display()),
        )
        .unwrap();
        let plot = dir.path().join("plot.yaml");
        std::fs::write(
            &plot,
            "id: p\nsteps:\n  - id: c\n    type: calc\n    inputs:\n      assignTo: x\n      expr: n * 2\n",
        )
        .unwrap();

        let args = RunArgs {
            plot,
            input: Some("{\"n\": 3}".to_string()),
            input_file: None,
            max_duration_ms: Some(1000),
            max_cost: None,
            trace_id: Some("cli-test".to_string()),
            trace: false,
            config: Some(config),
        };
        handle_run(args, true).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(&traces).unwrap().collect();
        assert_eq!(files.len(), 1);
        let name = files[0].as_ref().unwrap().file_name().to_string_lossy().to_string();
        assert!(name.ends_with("-cli-test.jsonl"), "{name}");
    }

    #[test]
    fn validate_reports_bad_plot() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.yaml");
        std::fs::write(&good, "id: g\nsteps:\n  - id: a\n    type: transform\n").unwrap();
        assert!(handle_validate(&good, true).is_ok());

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "id: b\nsteps:\n  - id: a\n    type: teleport\n").unwrap();
        assert!(handle_validate(&bad, true).is_err());
    }
}
