//! `octopus run` - Execute a document
//!
//! Services start through the configured container runtime; tests go
//! through the default runner backends. The report is printed as text or
//! JSON and the exit code reflects the overall verdict.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use super::{EXIT_FAIL, EXIT_INVALID, EXIT_PASS, ReportFormat, input};
use octopus::infrastructure::{Config, ContainerBackend, MetricsCollector};
use octopus::orchestrator::{Orchestrator, RunReport};
use octopus::plan::Plan;
use octopus::runner::RunnerDispatch;

/// Builds an orchestrator from configuration
pub fn orchestrator(config: &Config, metrics: Arc<MetricsCollector>) -> Orchestrator {
    let dispatch = RunnerDispatch::with_default_backends(config.container_runtime.command())
        .with_timeouts(config.execution_timeouts())
        .with_retry(config.retry_policy());
    let services = Arc::new(ContainerBackend::new(config.container_runtime));

    Orchestrator::new(services, dispatch)
        .with_options(config.orchestrator_options())
        .with_metrics(metrics)
}

/// Runs a validated plan
pub async fn run_plan(plan: &Plan, config: &Config) -> RunReport {
    let metrics = Arc::new(MetricsCollector::new());
    let report = orchestrator(config, Arc::clone(&metrics)).run(plan).await;

    if let Some(run) = metrics.get(&report.run_id) {
        info!(
            run = %run.run_id,
            duration_ms = report.duration_ms,
            services_ready = run.services_ready,
            services_failed = run.services_failed,
            tests = run.tests_total(),
            tests_passed = run.tests_passed,
            clean = run.is_clean(),
            "Run metrics"
        );
    }
    report
}

/// Renders a report in the requested format
pub fn render_report(report: &RunReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(report.to_string()),
        ReportFormat::Json => report.to_json().context("Failed to serialize report"),
    }
}

/// Loads, runs and reports a document
pub async fn run_document(
    file: &Path,
    sets: &[String],
    config: &Config,
    format: ReportFormat,
    output: Option<&Path>,
) -> Result<ExitCode> {
    let plan = match input::load_plan(file, sets)? {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("{}: {err}", file.display());
            return Ok(ExitCode::from(EXIT_INVALID));
        }
    };

    let report = run_plan(&plan, config).await;
    let rendered = render_report(&report, format)?;
    match output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("Failed to write report to: {}", path.display()))?,
        None => println!("{rendered}"),
    }

    Ok(ExitCode::from(if report.passed { EXIT_PASS } else { EXIT_FAIL }))
}
