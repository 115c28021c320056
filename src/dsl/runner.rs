//! Mode-specific runner configuration
//!
//! Each test mode accepts a closed set of runner fields. The raw `runner`
//! block is decoded according to the declared `mode`, so a `shell` test can
//! never carry an HTTP endpoint and vice versa.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::TestMode;

/// `shell` runner: a local command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellRunner {
    /// Command and arguments
    pub cmd: Vec<String>,
}

/// HTTP request method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
}

impl HttpMethod {
    /// Returns true if a payload is sent with this method
    #[must_use]
    pub fn carries_payload(&self) -> bool {
        !matches!(self, Self::Get | Self::Delete | Self::Head | Self::Options)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        };
        f.write_str(name)
    }
}

/// `http` runner: a single request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpRunner {
    /// Request method
    #[serde(default)]
    pub method: HttpMethod,
    /// Absolute request URL
    pub endpoint: String,
    /// Optional `Name: value` header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Optional request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl HttpRunner {
    /// Splits the configured header into name and value
    #[must_use]
    pub fn header_pair(&self) -> Option<(&str, &str)> {
        let header = self.header.as_deref()?;
        let (name, value) = header.split_once(':')?;
        Some((name.trim(), value.trim()))
    }
}

/// `pytest` runner: a test-runner invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PytestRunner {
    /// Root directory passed as `--rootdir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<String>,
    /// Arguments passed to pytest
    #[serde(default)]
    pub test_args: Vec<String>,
}

/// `docker` runner: a command executed in a running container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockerRunner {
    /// Target container name
    pub cntr_name: String,
    /// Command and arguments
    pub cmd: Vec<String>,
}

/// `grpc` runner: a unary call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrpcRunner {
    /// Optional proto descriptor; reflection is used without it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    /// Fully-qualified method, `package.Service/Method`
    pub function: String,
    /// `host:port` of the server
    pub endpoint: String,
    /// JSON request message
    #[serde(default = "empty_message")]
    pub payload: String,
}

fn empty_message() -> String {
    "{}".to_string()
}

/// Runner configuration, one variant per test mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RunnerConfig {
    /// Local command
    Shell(ShellRunner),
    /// HTTP request
    Http(HttpRunner),
    /// pytest invocation
    Pytest(PytestRunner),
    /// Exec in a container
    Docker(DockerRunner),
    /// gRPC call
    Grpc(GrpcRunner),
}

impl RunnerConfig {
    /// Decodes a raw runner block for the given mode
    ///
    /// # Errors
    ///
    /// Returns a human readable reason when a field is missing, unknown to the
    /// mode, or fails validation.
    pub fn from_value(mode: TestMode, value: serde_json::Value) -> Result<Self, String> {
        let config = match mode {
            TestMode::Shell => Self::Shell(decode(value)?),
            TestMode::Http => Self::Http(decode(value)?),
            TestMode::Pytest => Self::Pytest(decode(value)?),
            TestMode::Docker => Self::Docker(decode(value)?),
            TestMode::Grpc => Self::Grpc(decode(value)?),
        };
        config.validate()?;
        Ok(config)
    }

    /// The mode this configuration belongs to
    #[must_use]
    pub fn mode(&self) -> TestMode {
        match self {
            Self::Shell(_) => TestMode::Shell,
            Self::Http(_) => TestMode::Http,
            Self::Pytest(_) => TestMode::Pytest,
            Self::Docker(_) => TestMode::Docker,
            Self::Grpc(_) => TestMode::Grpc,
        }
    }

    /// Program and arguments for process-backed modes
    ///
    /// Returns `None` for HTTP, which is not run as a process.
    #[must_use]
    pub fn argv(&self) -> Option<Vec<String>> {
        match self {
            Self::Shell(runner) => Some(runner.cmd.clone()),
            Self::Pytest(runner) => {
                let mut argv = vec!["pytest".to_string()];
                if let Some(root) = &runner.root_dir {
                    argv.push("--rootdir".to_string());
                    argv.push(root.clone());
                }
                argv.extend(runner.test_args.iter().cloned());
                Some(argv)
            }
            Self::Docker(runner) => {
                let mut argv = vec![
                    "docker".to_string(),
                    "exec".to_string(),
                    runner.cntr_name.clone(),
                ];
                argv.extend(runner.cmd.iter().cloned());
                Some(argv)
            }
            Self::Grpc(runner) => {
                let mut argv = vec!["grpcurl".to_string()];
                if let Some(proto) = &runner.proto {
                    argv.push("-proto".to_string());
                    argv.push(proto.clone());
                }
                argv.push("-d".to_string());
                argv.push(runner.payload.clone());
                argv.push("-plaintext".to_string());
                argv.push(runner.endpoint.clone());
                argv.push(runner.function.clone());
                Some(argv)
            }
            Self::Http(_) => None,
        }
    }

    /// Renders the invocation as a shell command line
    #[must_use]
    pub fn command_line(&self) -> String {
        if let Some(argv) = self.argv() {
            return shell_words::join(argv);
        }
        let Self::Http(runner) = self else {
            return String::new();
        };
        let mut words = vec!["curl".to_string()];
        if let Some(header) = &runner.header {
            words.push("-H".to_string());
            words.push(header.clone());
        }
        words.push("-X".to_string());
        words.push(runner.method.to_string());
        if let Some(payload) = &runner.payload
            && runner.method.carries_payload()
        {
            words.push("-d".to_string());
            words.push(payload.clone());
        }
        words.push(runner.endpoint.clone());
        shell_words::join(words)
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Shell(runner) if runner.cmd.is_empty() => Err("cmd must not be empty".into()),
            Self::Docker(runner) if runner.cntr_name.trim().is_empty() => {
                Err("cntr_name must not be empty".into())
            }
            Self::Docker(runner) if runner.cmd.is_empty() => Err("cmd must not be empty".into()),
            Self::Http(runner) => {
                let url = url::Url::parse(&runner.endpoint)
                    .map_err(|e| format!("invalid endpoint '{}': {e}", runner.endpoint))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(format!("unsupported scheme '{}'", url.scheme()));
                }
                if runner.header.is_some() && runner.header_pair().is_none() {
                    return Err("header must look like 'Name: value'".into());
                }
                Ok(())
            }
            Self::Grpc(runner) if !runner.function.contains('/') => Err(format!(
                "function '{}' must be fully qualified as 'package.Service/Method'",
                runner.function
            )),
            Self::Grpc(runner) if runner.endpoint.trim().is_empty() => {
                Err("endpoint must not be empty".into())
            }
            _ => Ok(()),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}
