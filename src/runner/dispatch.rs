//! Mode-to-backend dispatch with timeout and retry policy

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{
    HttpBackend, Outcome, ProcessBackend, RunnerBackend, RunnerError, Verdict, evaluate,
};
use crate::dsl::{RunnerConfig, Test, TestMode};

/// Default per-mode execution limit
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Retry policy for [`RunnerError::Execution`] failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1 << exponent)
    }
}

/// Per-mode execution limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTimeouts {
    default: Duration,
    per_mode: HashMap<TestMode, Duration>,
}

impl Default for ExecutionTimeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_EXECUTION_TIMEOUT)
    }
}

impl ExecutionTimeouts {
    /// Same limit for every mode
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            default: timeout,
            per_mode: HashMap::new(),
        }
    }

    /// Overrides the limit of one mode
    #[must_use]
    pub fn with_mode(mut self, mode: TestMode, timeout: Duration) -> Self {
        self.per_mode.insert(mode, timeout);
        self
    }

    /// Limit applied to `mode`
    #[must_use]
    pub fn get(&self, mode: TestMode) -> Duration {
        self.per_mode.get(&mode).copied().unwrap_or(self.default)
    }
}

/// Everything recorded about one test execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    /// Outcome of the last attempt, if one was produced
    pub outcome: Option<Outcome>,
    /// Verdict, or the error that prevented one
    pub result: Result<Verdict, RunnerError>,
    /// Attempts made
    pub attempts: u32,
    /// Wall time across all attempts
    pub duration: Duration,
}

impl TestRun {
    /// Returns true if the verdict is [`Verdict::Passed`]
    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self.result, Ok(Verdict::Passed))
    }
}

/// Routes each test to the backend registered for its mode
#[derive(Clone, Default)]
pub struct RunnerDispatch {
    backends: HashMap<TestMode, Arc<dyn RunnerBackend>>,
    timeouts: ExecutionTimeouts,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RunnerDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut modes: Vec<&TestMode> = self.backends.keys().collect();
        modes.sort();
        f.debug_struct("RunnerDispatch")
            .field("modes", &modes)
            .field("timeouts", &self.timeouts)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RunnerDispatch {
    /// Creates a dispatch with no backends
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the default process and HTTP backends
    #[must_use]
    pub fn with_default_backends(container_runtime: &str) -> Self {
        let process: Arc<dyn RunnerBackend> =
            Arc::new(ProcessBackend::new().with_container_runtime(container_runtime));
        Self::new()
            .with_backend(TestMode::Shell, Arc::clone(&process))
            .with_backend(TestMode::Pytest, Arc::clone(&process))
            .with_backend(TestMode::Docker, Arc::clone(&process))
            .with_backend(TestMode::Grpc, process)
            .with_backend(TestMode::Http, Arc::new(HttpBackend::new()))
    }

    /// Registers `backend` for `mode`, replacing any previous one
    #[must_use]
    pub fn with_backend(mut self, mode: TestMode, backend: Arc<dyn RunnerBackend>) -> Self {
        self.backends.insert(mode, backend);
        self
    }

    /// Sets the execution limits
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ExecutionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns true if a backend serves `mode`
    #[must_use]
    pub fn supports(&self, mode: TestMode) -> bool {
        self.backends.contains_key(&mode)
    }

    /// Runs one attempt of `config` under the mode's time limit
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Execution`] if no backend serves the mode or
    /// the backend fails, and [`RunnerError::ExecutionTimeout`] if the limit
    /// is exceeded.
    pub async fn execute(&self, config: &RunnerConfig) -> Result<Outcome, RunnerError> {
        let mode = config.mode();
        let backend = self
            .backends
            .get(&mode)
            .ok_or_else(|| RunnerError::execution(mode, "no backend registered for mode"))?;
        let timeout = self.timeouts.get(mode);

        tokio::time::timeout(timeout, backend.execute(config))
            .await
            .map_err(|_| RunnerError::ExecutionTimeout { mode, timeout })?
    }

    /// Runs `test`, retrying execution failures, and evaluates the outcome
    pub async fn run(&self, test: &Test) -> TestRun {
        let started = Instant::now();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.execute(&test.runner).await {
                Ok(outcome) => {
                    let result = evaluate(&test.expect, &outcome);
                    debug!(
                        test = %test.name,
                        attempts,
                        passed = matches!(result, Ok(Verdict::Passed)),
                        "Test evaluated"
                    );
                    return TestRun {
                        outcome: Some(outcome),
                        result,
                        attempts,
                        duration: started.elapsed(),
                    };
                }
                Err(err) if err.is_retryable() && attempts < max_attempts => {
                    let delay = self.retry.delay(attempts);
                    warn!(
                        test = %test.name,
                        attempt = attempts,
                        error = %err,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Runner failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return TestRun {
                        outcome: None,
                        result: Err(err),
                        attempts,
                        duration: started.elapsed(),
                    };
                }
            }
        }
    }
}
