//! Metrics collection
//!
//! Provides per-run counters keyed by run id.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::orchestrator::{RunReport, ServiceState};

/// Metrics for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetrics {
    /// Run id
    pub run_id: Uuid,

    /// Execution duration, teardown included
    pub duration: Duration,

    /// Services that reached `Ready` at some point
    pub services_ready: usize,

    /// Services that failed to start, become ready or stop
    pub services_failed: usize,

    /// Services never started
    pub services_skipped: usize,

    /// Passed tests
    pub tests_passed: usize,

    /// Tests with mismatched expectations
    pub tests_failed: usize,

    /// Tests that could not produce a verdict
    pub tests_errored: usize,

    /// Tests never run
    pub tests_skipped: usize,

    /// Overall verdict
    pub passed: bool,
}

impl RunMetrics {
    /// Derives the counters from a finished report
    #[must_use]
    pub fn from_report(report: &RunReport, duration: Duration) -> Self {
        let summary = report.summary();
        let count = |wanted: fn(ServiceState) -> bool| {
            report.services.iter().filter(|s| wanted(s.state)).count()
        };

        Self {
            run_id: report.run_id,
            duration,
            services_ready: count(|s| s.was_ready()),
            services_failed: count(|s| s == ServiceState::Failed),
            services_skipped: count(|s| s == ServiceState::Skipped),
            tests_passed: summary.passed,
            tests_failed: summary.failed,
            tests_errored: summary.errored,
            tests_skipped: summary.skipped,
            passed: report.passed,
        }
    }

    /// Total tests in the run
    #[must_use]
    pub fn tests_total(&self) -> usize {
        self.tests_passed + self.tests_failed + self.tests_errored + self.tests_skipped
    }

    /// Returns true if no test was skipped, failed or errored
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.tests_passed == self.tests_total() && self.services_failed == 0
    }
}

/// Metrics collector for runs
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<HashMap<Uuid, RunMetrics>>>,
}

impl MetricsCollector {
    /// Creates a new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records metrics for a run, replacing any earlier entry for its id
    pub fn record(&self, metrics: RunMetrics) {
        self.metrics.write().insert(metrics.run_id, metrics);
    }

    /// Gets metrics for a specific run
    #[must_use]
    pub fn get(&self, run_id: &Uuid) -> Option<RunMetrics> {
        self.metrics.read().get(run_id).cloned()
    }
}
