//! Node states and execution records

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::graph::NodeKind;
use crate::runner::{FieldMismatch, Outcome, RunnerError, TestRun, Verdict};

/// Lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Waiting for predecessors
    Pending,
    /// Started, waiting for readiness
    Starting,
    /// Ready to serve tests and successors
    Ready,
    /// Being torn down
    Stopping,
    /// Torn down
    Stopped,
    /// Failed to start, become ready or stop
    Failed,
    /// Never started because a predecessor did not become ready
    Skipped,
}

impl ServiceState {
    /// Returns true if dependents can no longer run
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }

    /// Returns true if the service reached readiness at some point
    #[must_use]
    pub fn was_ready(&self) -> bool {
        matches!(self, Self::Ready | Self::Stopping | Self::Stopped)
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution state of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    /// Not yet scheduled or waiting for needs
    Pending,
    /// Runner in flight
    Running,
    /// Every expectation matched
    Passed,
    /// An expectation did not match or the outcome was incomplete
    Failed,
    /// The runner could not produce an outcome
    Errored,
    /// Never ran
    Skipped,
}

impl TestState {
    /// Returns true once the test will not change state again
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Terminal state for a finished run
    #[must_use]
    pub fn from_run(run: &TestRun) -> Self {
        match &run.result {
            Ok(Verdict::Passed) => Self::Passed,
            Ok(Verdict::Failed { .. }) | Err(RunnerError::IncompleteOutcome { .. }) => Self::Failed,
            Err(_) => Self::Errored,
        }
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of either kind of node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NodeState {
    /// Service state
    Service(ServiceState),
    /// Test state
    Test(TestState),
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(state) => state.fmt(f),
            Self::Test(state) => state.fmt(f),
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// Position in the run's trace
    pub seq: usize,
    /// Node name
    pub node: String,
    /// Node kind
    pub kind: NodeKind,
    /// Previous state
    pub from: NodeState,
    /// New state
    pub to: NodeState,
    /// Milliseconds since the run started
    pub elapsed_ms: u64,
}

/// Final record of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    /// Service name
    pub name: String,
    /// Terminal state
    pub state: ServiceState,
    /// Startup, readiness or stop failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time from start request to readiness
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_ms: Option<u64>,
}

/// Final record of a test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRecord {
    /// Test name
    pub name: String,
    /// Terminal state
    pub state: TestState,
    /// Attempts made
    pub attempts: u32,
    /// Outcome of the last attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Mismatching fields of a failed test
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<FieldMismatch>,
    /// Runner error or skip reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time across attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TestRecord {
    pub(crate) fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: TestState::Pending,
            attempts: 0,
            outcome: None,
            mismatches: Vec::new(),
            error: None,
            duration_ms: None,
        }
    }

    pub(crate) fn apply_run(&mut self, run: TestRun) {
        self.state = TestState::from_run(&run);
        self.attempts = run.attempts;
        self.duration_ms = Some(millis(run.duration));
        self.outcome = run.outcome;
        match run.result {
            Ok(Verdict::Passed) => {}
            Ok(Verdict::Failed { mismatches }) => self.mismatches = mismatches,
            Err(err) => self.error = Some(err.to_string()),
        }
    }
}

impl ServiceRecord {
    pub(crate) fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ServiceState::Pending,
            error: None,
            startup_ms: None,
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
