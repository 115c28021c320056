//! Container service backend (Docker/Podman)
//!
//! Starts services as detached containers through the runtime CLI. A
//! container is ready once it is running and, when the image defines a
//! healthcheck, reported `healthy`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::dsl::Service;
use crate::orchestrator::{LifecycleError, ServiceBackend, ServiceHandle};

/// Interval between readiness probes
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Probe printing `<status> <health>`; health is empty without a healthcheck.
const INSPECT_FORMAT: &str = "{{.State.Status}} {{if .State.Health}}{{.State.Health.Status}}{{end}}";

/// Container runtime type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    /// Docker runtime
    #[default]
    Docker,
    /// Podman runtime
    Podman,
}

impl ContainerRuntime {
    /// Executable name
    #[must_use]
    pub fn command(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command())
    }
}

impl FromStr for ContainerRuntime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            other => Err(format!("unknown container runtime '{other}'")),
        }
    }
}

/// What one readiness probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Probe {
    Ready,
    Waiting,
    Exited(String),
}

/// Interprets the output of `inspect --format INSPECT_FORMAT`
pub(crate) fn parse_probe(output: &str) -> Probe {
    let mut fields = output.split_whitespace();
    let status = fields.next().unwrap_or_default();
    let health = fields.next().unwrap_or_default();
    match (status, health) {
        ("running", "" | "healthy") => Probe::Ready,
        ("exited" | "dead", _) => Probe::Exited(format!("container is {status}")),
        _ => Probe::Waiting,
    }
}

/// Service backend driving the Docker or Podman CLI
#[derive(Debug, Clone, Default)]
pub struct ContainerBackend {
    runtime: ContainerRuntime,
}

impl ContainerBackend {
    /// Creates a backend for the given runtime
    #[must_use]
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// The runtime in use
    #[must_use]
    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    /// Runs the runtime CLI and returns trimmed stdout
    async fn cli(&self, args: &[String]) -> Result<String, String> {
        debug!(runtime = %self.runtime, args = %shell_words::join(args), "Running container command");
        let output = Command::new(self.runtime.command())
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.runtime))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.runtime,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn probe(&self, handle: &ServiceHandle) -> Result<Probe, LifecycleError> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            INSPECT_FORMAT.to_string(),
            handle.id.clone(),
        ];
        self.cli(&args)
            .await
            .map(|output| parse_probe(&output))
            .map_err(|reason| LifecycleError::NotReady {
                service: handle.service.clone(),
                reason,
            })
    }
}

#[async_trait]
impl ServiceBackend for ContainerBackend {
    async fn start(&self, service: &Service) -> Result<ServiceHandle, LifecycleError> {
        info!(service = %service.name, image = %service.image, runtime = %self.runtime, "Starting container");
        let id = self
            .cli(&service.run_args())
            .await
            .map_err(|reason| LifecycleError::StartFailed {
                service: service.name.clone(),
                reason,
            })?;
        let id = if id.is_empty() { service.name.clone() } else { id };
        Ok(ServiceHandle {
            service: service.name.clone(),
            id,
        })
    }

    async fn await_ready(
        &self,
        handle: &ServiceHandle,
        timeout: Duration,
    ) -> Result<bool, LifecycleError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.probe(handle).await? {
                Probe::Ready => return Ok(true),
                Probe::Exited(reason) => {
                    return Err(LifecycleError::NotReady {
                        service: handle.service.clone(),
                        reason,
                    });
                }
                Probe::Waiting => {}
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn stop(&self, handle: &ServiceHandle) -> Result<(), LifecycleError> {
        info!(service = %handle.service, "Removing container");
        let args = vec!["rm".to_string(), "-f".to_string(), handle.id.clone()];
        self.cli(&args)
            .await
            .map(|_| ())
            .map_err(|reason| LifecycleError::StopFailed {
                service: handle.service.clone(),
                reason,
            })
    }
}
