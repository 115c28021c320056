//! Configuration management
//!
//! Settings come from built-in defaults, then an optional YAML file, then
//! `OCTOPUS_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::container::ContainerRuntime;
use crate::dsl::TestMode;
use crate::orchestrator::{DEFAULT_MAX_PARALLEL, OrchestratorOptions};
use crate::runner::{ExecutionTimeouts, RetryPolicy};

/// Environment variable overriding [`Config::log_level`]
pub const ENV_LOG_LEVEL: &str = "OCTOPUS_LOG_LEVEL";
/// Environment variable overriding [`Config::max_parallel`]
pub const ENV_MAX_PARALLEL: &str = "OCTOPUS_MAX_PARALLEL";
/// Environment variable overriding [`Config::container_runtime`]
pub const ENV_CONTAINER_RUNTIME: &str = "OCTOPUS_CONTAINER_RUNTIME";

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Cannot read config file '{path}': {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not a valid configuration
    #[error("Invalid config file '{path}': {reason}")]
    Parse {
        /// File path
        path: String,
        /// Parser message
        reason: String,
    },

    /// An environment override has an unusable value
    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidEnv {
        /// Variable name
        name: String,
        /// Offending value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Execution limits in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionTimeoutConfig {
    /// Limit for modes without their own entry
    pub default: u64,
    /// Per-mode limits
    #[serde(flatten)]
    pub modes: HashMap<TestMode, u64>,
}

impl Default for ExecutionTimeoutConfig {
    fn default() -> Self {
        Self {
            default: 60,
            modes: HashMap::new(),
        }
    }
}

/// Retry settings for transport failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Initial backoff in milliseconds
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Log level
    pub log_level: String,
    /// Readiness limit per service, in seconds
    pub readiness_timeout_secs: u64,
    /// Execution limits per test mode
    pub execution_timeout_secs: ExecutionTimeoutConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Concurrent startups and test runs
    pub max_parallel: usize,
    /// Runtime used for services and docker tests
    pub container_runtime: ContainerRuntime,
    /// Stop services after the run
    pub teardown: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            readiness_timeout_secs: 60,
            execution_timeout_secs: ExecutionTimeoutConfig::default(),
            retry: RetryConfig::default(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            container_runtime: ContainerRuntime::default(),
            teardown: true,
        }
    }
}

impl Config {
    /// Loads a YAML configuration file; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|reason| ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        })
    }

    /// Parses YAML text; an empty document yields the defaults
    ///
    /// # Errors
    ///
    /// Returns the parser message.
    pub fn from_yaml(text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| e.to_string())
    }

    /// Applies `OCTOPUS_*` overrides from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparsable values.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparsable values.
    pub fn apply_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
        if let Some(value) = lookup(ENV_MAX_PARALLEL) {
            self.max_parallel = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                Ok(_) => return Err(invalid_env(ENV_MAX_PARALLEL, &value, "must be at least 1")),
                Err(e) => return Err(invalid_env(ENV_MAX_PARALLEL, &value, &e.to_string())),
            };
        }
        if let Some(value) = lookup(ENV_CONTAINER_RUNTIME) {
            self.container_runtime = value
                .parse::<ContainerRuntime>()
                .map_err(|reason: String| invalid_env(ENV_CONTAINER_RUNTIME, &value, &reason))?;
        }
        Ok(self)
    }

    /// Execution limits for the runner dispatch
    #[must_use]
    pub fn execution_timeouts(&self) -> ExecutionTimeouts {
        let limits = &self.execution_timeout_secs;
        limits.modes.iter().fold(
            ExecutionTimeouts::uniform(Duration::from_secs(limits.default)),
            |timeouts, (&mode, &secs)| timeouts.with_mode(mode, Duration::from_secs(secs)),
        )
    }

    /// Retry policy for the runner dispatch
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            backoff: Duration::from_millis(self.retry.backoff_ms),
        }
    }

    /// Scheduler settings
    #[must_use]
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            max_parallel: self.max_parallel.max(1),
            readiness_timeout: Duration::from_secs(self.readiness_timeout_secs),
            teardown: self.teardown,
        }
    }
}

fn invalid_env(name: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
