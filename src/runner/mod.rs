//! Runner dispatch
//!
//! Every test mode is executed by a [`RunnerBackend`]. Backends produce a
//! normalized [`Outcome`], which is then compared against the test's
//! expectations to obtain a [`Verdict`].

pub mod dispatch;
pub mod http;
pub mod outcome;
pub mod process;
pub mod traits;

pub use dispatch::{ExecutionTimeouts, RetryPolicy, RunnerDispatch, TestRun};
pub use http::HttpBackend;
pub use outcome::{FieldMismatch, Outcome, Verdict, evaluate};
pub use process::ProcessBackend;
pub use traits::RunnerBackend;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::dsl::TestMode;

/// Errors raised while executing a test runner
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerError {
    /// The process or transport failed before producing an outcome
    #[error("{mode} runner failed: {reason}")]
    Execution {
        /// Mode of the failing runner.
        mode: TestMode,
        /// Underlying failure.
        reason: String,
    },

    /// The runner did not finish in time
    #[error("{mode} runner timed out after {}s", .timeout.as_secs_f64())]
    ExecutionTimeout {
        /// Mode of the runner.
        mode: TestMode,
        /// Configured limit.
        #[serde(with = "duration_ms")]
        timeout: Duration,
    },

    /// The outcome lacks a field the test expects
    #[error("Outcome is missing expected fields: {}", .fields.join(", "))]
    IncompleteOutcome {
        /// Expected fields absent from the outcome.
        fields: Vec<String>,
    },
}

impl RunnerError {
    pub(crate) fn execution(mode: TestMode, reason: impl Into<String>) -> Self {
        Self::Execution {
            mode,
            reason: reason.into(),
        }
    }

    /// Returns true if another attempt may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_execution_errors_are_retryable() {
        assert!(RunnerError::execution(TestMode::Http, "connection refused").is_retryable());
        assert!(
            !RunnerError::ExecutionTimeout {
                mode: TestMode::Shell,
                timeout: Duration::from_secs(1),
            }
            .is_retryable()
        );
        assert!(
            !RunnerError::IncompleteOutcome {
                fields: vec!["stdout".to_string()],
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_display() {
        let err = RunnerError::ExecutionTimeout {
            mode: TestMode::Grpc,
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "grpc runner timed out after 1.5s");

        let err = RunnerError::execution(TestMode::Shell, "spawn failed");
        assert_eq!(err.to_string(), "shell runner failed: spawn failed");
    }

    #[test]
    fn test_error_serializes_with_kind() {
        let err = RunnerError::IncompleteOutcome {
            fields: vec!["response".to_string()],
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "incomplete_outcome");
        assert_eq!(value["fields"][0], "response");
    }
}
