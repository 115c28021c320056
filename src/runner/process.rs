//! Process-backed runners: `shell`, `pytest`, `docker` and `grpc`

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{Outcome, RunnerBackend, RunnerError};
use crate::dsl::{RunnerConfig, TestMode};

/// grpcurl reports an RPC failure as exit code `64 + status`.
const GRPCURL_STATUS_OFFSET: i32 = 64;

/// Runs process-backed test modes as local child processes
///
/// Children are killed when the execution future is dropped, so a timeout
/// in the dispatcher also terminates the process.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    shell: String,
    container_runtime: String,
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            container_runtime: "docker".to_string(),
        }
    }
}

impl ProcessBackend {
    /// Creates a backend using `sh` and `docker`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shell used for single-string `cmd` entries
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Sets the container CLI used by `docker` mode
    #[must_use]
    pub fn with_container_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.container_runtime = runtime.into();
        self
    }

    /// Program and arguments actually spawned for `config`
    ///
    /// A shell `cmd` with a single entry is handed to the shell so that
    /// pipes and quoting work as written.
    #[must_use]
    pub fn command_for(&self, config: &RunnerConfig) -> Option<Vec<String>> {
        let mut argv = config.argv()?;
        match config {
            RunnerConfig::Shell(_) if argv.len() == 1 => {
                let script = argv.remove(0);
                Some(vec![self.shell.clone(), "-c".to_string(), script])
            }
            RunnerConfig::Docker(_) => {
                if let Some(program) = argv.first_mut() {
                    program.clone_from(&self.container_runtime);
                }
                Some(argv)
            }
            _ => Some(argv),
        }
    }
}

#[async_trait]
impl RunnerBackend for ProcessBackend {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(&self, config: &RunnerConfig) -> Result<Outcome, RunnerError> {
        let mode = config.mode();
        let argv = self
            .command_for(config)
            .ok_or_else(|| RunnerError::execution(mode, "mode is not process-backed"))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RunnerError::execution(mode, "empty command"))?;

        debug!(mode = %mode, command = %shell_words::join(&argv), "Spawning runner process");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RunnerError::execution(mode, format!("failed to spawn '{program}': {e}")))?;

        let Some(code) = output.status.code() else {
            return Err(RunnerError::execution(mode, "process terminated by signal"));
        };
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if mode == TestMode::Grpc {
            return grpc_outcome(code, stdout, &stderr);
        }
        Ok(Outcome::process(code, stdout, stderr))
    }
}

/// Maps a grpcurl exit code back to the gRPC status
fn grpc_outcome(code: i32, stdout: String, stderr: &str) -> Result<Outcome, RunnerError> {
    let status = match code {
        0 => 0,
        c if c >= GRPCURL_STATUS_OFFSET => c - GRPCURL_STATUS_OFFSET,
        _ => {
            return Err(RunnerError::execution(
                TestMode::Grpc,
                format!("grpcurl exited with {code}: {}", stderr.trim()),
            ));
        }
    };
    Ok(Outcome::response(status, stdout))
}
