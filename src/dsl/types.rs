//! Core types for the document domain
//!
//! Inputs, services, tests and their expectations, as they look once every
//! placeholder has been resolved.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use super::runner::RunnerConfig;

/// Prefix marking a lazy input name.
pub const LAZY_PREFIX: char = '$';

/// A declared document variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Name without the lazy prefix
    pub name: String,
    /// Declared value (or default, for lazy inputs)
    pub value: String,
    /// Whether the input is resolved lazily and may be overridden at run time
    pub lazy: bool,
}

impl Input {
    /// Creates an immediate input
    pub fn immediate(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            lazy: false,
        }
    }

    /// Creates a lazy input
    pub fn lazy(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: default.into(),
            lazy: true,
        }
    }

    /// Parses a declared key: `$NAME` is lazy, `NAME` is immediate
    pub fn from_declaration(key: &str, value: impl Into<String>) -> Self {
        match key.strip_prefix(LAZY_PREFIX) {
            Some(name) => Self::lazy(name, value),
            None => Self::immediate(key, value),
        }
    }

    /// The token a placeholder uses to reference this input
    pub fn token(&self) -> String {
        if self.lazy {
            format!("{LAZY_PREFIX}{}", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// A containerized component to stand up before tests run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Service {
    /// Service name, also used as the container name
    pub name: String,
    /// Human readable description
    #[serde(default)]
    pub desc: String,
    /// Container image
    pub image: String,
    /// Extra container run arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment entries (`KEY=value`)
    #[serde(default)]
    pub envs: Vec<String>,
    /// Port mappings (`host:container`)
    #[serde(default)]
    pub ports: Vec<String>,
    /// Volume mappings (`host:container`)
    #[serde(default)]
    pub vols: Vec<String>,
    /// Services that must be ready before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Services to start once this one is ready
    #[serde(default)]
    pub next: Vec<String>,
    /// Tests scheduled once this service is ready
    #[serde(default)]
    pub trigger: Vec<String>,
}

impl Service {
    /// Renders the container run invocation for this service
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];
        args.extend(self.args.iter().cloned());
        for env in &self.envs {
            args.push("-e".to_string());
            args.push(env.clone());
        }
        for port in &self.ports {
            args.push("-p".to_string());
            args.push(port.clone());
        }
        for vol in &self.vols {
            args.push("-v".to_string());
            args.push(vol.clone());
        }
        args.push(self.image.clone());
        args
    }

    /// Renders the full command line, for plans and logs
    pub fn command_line(&self, runtime: &str) -> String {
        let mut words = vec![runtime.to_string()];
        words.extend(self.run_args());
        shell_words::join(words)
    }
}

/// Execution mode of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Local process
    Shell,
    /// HTTP request
    Http,
    /// pytest invocation
    Pytest,
    /// Command executed inside a running container
    Docker,
    /// gRPC call
    Grpc,
}

impl TestMode {
    /// All modes, in declaration order
    pub const ALL: [TestMode; 5] = [
        TestMode::Shell,
        TestMode::Http,
        TestMode::Pytest,
        TestMode::Docker,
        TestMode::Grpc,
    ];

    /// Lowercase name as written in documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Http => "http",
            Self::Pytest => "pytest",
            Self::Docker => "docker",
            Self::Grpc => "grpc",
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown test mode '{s}'"))
    }
}

/// Expected-result assertions of a test
///
/// Only the fields that are set take part in the verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Expect {
    /// Process exit code
    #[serde(default, deserialize_with = "de_opt_code", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Standard output, compared trimmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Standard error, compared trimmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// HTTP or gRPC status code
    #[serde(default, deserialize_with = "de_opt_code", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    /// Response body, text or structured JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl Expect {
    /// Returns true if no assertion is declared
    pub fn is_empty(&self) -> bool {
        self.exit_code.is_none()
            && self.stdout.is_none()
            && self.stderr.is_none()
            && self.status_code.is_none()
            && self.response.is_none()
    }
}

/// Accepts `0`, `"0"` or a resolved placeholder rendering a number.
fn de_opt_code<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(i64),
        Text(String),
    }

    match Option::<Code>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Code::Number(n)) => i32::try_from(n)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("code out of range: {n}"))),
        Some(Code::Text(text)) => text
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("not a numeric code: '{text}'"))),
    }
}

/// A verification step run against the services
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Test {
    /// Test name
    pub name: String,
    /// Human readable description
    pub desc: String,
    /// Execution mode
    pub mode: TestMode,
    /// Services that must be ready before the test runs
    pub needs: Vec<String>,
    /// Mode-specific runner configuration
    pub runner: RunnerConfig,
    /// Assertions on the runner outcome
    pub expect: Expect,
}

impl Test {
    /// Renders the runner invocation, for plans and logs
    pub fn command_line(&self) -> String {
        self.runner.command_line()
    }
}
