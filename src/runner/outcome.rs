//! Normalized runner outcomes and verdict evaluation

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RunnerError;
use crate::dsl::Expect;

/// What a runner observed
///
/// Process-backed modes fill `exit_code`, `stdout` and `stderr`. HTTP and
/// gRPC fill `status_code` and `response`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Process exit code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured standard output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// HTTP or gRPC status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    /// Response body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl Outcome {
    /// Outcome of a finished process
    pub fn process(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: Some(stdout.into()),
            stderr: Some(stderr.into()),
            ..Self::default()
        }
    }

    /// Outcome of a request/response exchange
    pub fn response(status_code: i32, response: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            response: Some(response.into()),
            ..Self::default()
        }
    }
}

/// One expected field that did not match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMismatch {
    /// Field name
    pub field: String,
    /// Expected value, rendered
    pub expected: String,
    /// Observed value, rendered
    pub actual: String,
}

/// Result of comparing an outcome with its expectations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Verdict {
    /// Every expected field matched
    Passed,
    /// At least one expected field differs
    Failed {
        /// Every mismatching field, in field order
        mismatches: Vec<FieldMismatch>,
    },
}

impl Verdict {
    /// Returns true for [`Verdict::Passed`]
    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Compares `outcome` with `expect`
///
/// Codes compare by equality, `stdout`/`stderr` after trimming, and
/// `response` by JSON equality when both sides parse, else trimmed text.
///
/// # Errors
///
/// Returns [`RunnerError::IncompleteOutcome`] listing every expected field
/// the outcome does not carry.
pub fn evaluate(expect: &Expect, outcome: &Outcome) -> Result<Verdict, RunnerError> {
    let mut check = Comparison::default();

    check.code("exit_code", expect.exit_code, outcome.exit_code);
    check.text("stdout", expect.stdout.as_deref(), outcome.stdout.as_deref());
    check.text("stderr", expect.stderr.as_deref(), outcome.stderr.as_deref());
    check.code("status_code", expect.status_code, outcome.status_code);

    if let Some(expected) = &expect.response {
        match outcome.response.as_deref() {
            None => check.missing.push("response".to_string()),
            Some(actual) if response_matches(expected, actual) => {}
            Some(actual) => check.mismatch("response", render_value(expected), actual.trim()),
        }
    }

    if !check.missing.is_empty() {
        return Err(RunnerError::IncompleteOutcome {
            fields: check.missing,
        });
    }
    if check.mismatches.is_empty() {
        Ok(Verdict::Passed)
    } else {
        Ok(Verdict::Failed {
            mismatches: check.mismatches,
        })
    }
}

#[derive(Default)]
struct Comparison {
    missing: Vec<String>,
    mismatches: Vec<FieldMismatch>,
}

impl Comparison {
    fn mismatch(&mut self, field: &str, expected: impl Into<String>, actual: impl Into<String>) {
        self.mismatches.push(FieldMismatch {
            field: field.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        });
    }

    fn code(&mut self, field: &str, expected: Option<i32>, actual: Option<i32>) {
        let Some(expected) = expected else { return };
        match actual {
            None => self.missing.push(field.to_string()),
            Some(actual) if actual == expected => {}
            Some(actual) => self.mismatch(field, expected.to_string(), actual.to_string()),
        }
    }

    fn text(&mut self, field: &str, expected: Option<&str>, actual: Option<&str>) {
        let Some(expected) = expected else { return };
        match actual {
            None => self.missing.push(field.to_string()),
            Some(actual) if actual.trim() == expected.trim() => {}
            Some(actual) => self.mismatch(field, expected.trim(), actual.trim()),
        }
    }
}

fn response_matches(expected: &Value, actual: &str) -> bool {
    let actual_json = serde_json::from_str::<Value>(actual.trim()).ok();
    match expected {
        Value::String(text) => {
            let expected_json = serde_json::from_str::<Value>(text.trim()).ok();
            match (expected_json, actual_json) {
                (Some(e), Some(a)) if e == a => true,
                _ => text.trim() == actual.trim(),
            }
        }
        structured => actual_json.as_ref() == Some(structured),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}
