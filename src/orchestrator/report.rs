//! Run report

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use super::state::{ServiceRecord, ServiceState, TestRecord, TestState, Transition};

/// Counts of tests by terminal state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    /// Passed tests
    pub passed: usize,
    /// Failed tests
    pub failed: usize,
    /// Errored tests
    pub errored: usize,
    /// Skipped tests
    pub skipped: usize,
}

impl TestSummary {
    /// Total number of tests
    #[must_use]
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored + self.skipped
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Unique run id
    pub run_id: Uuid,
    /// True iff every test passed
    pub passed: bool,
    /// Wall time of the run, teardown included
    pub duration_ms: u64,
    /// Services in declaration order
    pub services: Vec<ServiceRecord>,
    /// Tests in declaration order
    pub tests: Vec<TestRecord>,
    /// Every state change, in order
    pub trace: Vec<Transition>,
}

impl RunReport {
    /// Record of the named service
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Record of the named test
    #[must_use]
    pub fn test(&self, name: &str) -> Option<&TestRecord> {
        self.tests.iter().find(|t| t.name == name)
    }

    /// Terminal state of a service
    #[must_use]
    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.service(name).map(|s| s.state)
    }

    /// Terminal state of a test
    #[must_use]
    pub fn test_state(&self, name: &str) -> Option<TestState> {
        self.test(name).map(|t| t.state)
    }

    /// Test counts by state
    #[must_use]
    pub fn summary(&self) -> TestSummary {
        let mut summary = TestSummary::default();
        for test in &self.tests {
            match test.state {
                TestState::Passed => summary.passed += 1,
                TestState::Failed => summary.failed += 1,
                TestState::Errored => summary.errored += 1,
                TestState::Skipped | TestState::Pending | TestState::Running => {
                    summary.skipped += 1;
                }
            }
        }
        summary
    }

    /// Renders the report as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns a serialization error; not expected for well-formed reports.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;

        writeln!(f, "Services:")?;
        for service in &self.services {
            write!(f, "  {:<24} {}", service.name, service.state)?;
            if let Some(ms) = service.startup_ms {
                write!(f, " (ready in {ms}ms)")?;
            }
            writeln!(f)?;
            if let Some(error) = &service.error {
                writeln!(f, "      {error}")?;
            }
        }

        writeln!(f, "Tests:")?;
        for test in &self.tests {
            write!(f, "  {:<24} {}", test.name, test.state.as_str().to_uppercase())?;
            if test.attempts > 1 {
                write!(f, " after {} attempts", test.attempts)?;
            }
            writeln!(f)?;
            for mismatch in &test.mismatches {
                writeln!(
                    f,
                    "      {}: expected {:?}, got {:?}",
                    mismatch.field, mismatch.expected, mismatch.actual
                )?;
            }
            if let Some(error) = &test.error {
                writeln!(f, "      {error}")?;
            }
        }

        let summary = self.summary();
        writeln!(
            f,
            "Result: {} ({} passed, {} failed, {} errored, {} skipped of {}) in {}ms",
            if self.passed { "PASS" } else { "FAIL" },
            summary.passed,
            summary.failed,
            summary.errored,
            summary.skipped,
            summary.total(),
            self.duration_ms
        )
    }
}
