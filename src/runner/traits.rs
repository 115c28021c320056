//! Runner backend contract

use async_trait::async_trait;

use super::{Outcome, RunnerError};
use crate::dsl::RunnerConfig;

/// Executes runner configurations of one or more test modes
#[async_trait]
pub trait RunnerBackend: Send + Sync {
    /// Short backend name, for logs
    fn name(&self) -> &str;

    /// Runs `config` once and reports what was observed
    ///
    /// Only transport or process failures are errors; a non-zero exit code
    /// or an error status is a regular outcome.
    async fn execute(&self, config: &RunnerConfig) -> Result<Outcome, RunnerError>;
}
