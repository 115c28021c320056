//! Service lifecycle contract

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::dsl::Service;

/// Errors raised by a [`ServiceBackend`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The service could not be started
    #[error("Service '{service}' failed to start: {reason}")]
    StartFailed {
        /// Service name.
        service: String,
        /// Backend failure.
        reason: String,
    },

    /// The service did not become ready in time
    #[error("Service '{service}' not ready after {}s", .timeout.as_secs_f64())]
    ReadinessTimeout {
        /// Service name.
        service: String,
        /// Configured readiness limit.
        timeout: Duration,
    },

    /// The service stopped or reported itself unhealthy while starting
    #[error("Service '{service}' cannot become ready: {reason}")]
    NotReady {
        /// Service name.
        service: String,
        /// Backend observation.
        reason: String,
    },

    /// Teardown failed
    #[error("Service '{service}' failed to stop: {reason}")]
    StopFailed {
        /// Service name.
        service: String,
        /// Backend failure.
        reason: String,
    },
}

/// Reference to a started service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Service name
    pub service: String,
    /// Backend-specific identifier (container id for containers)
    pub id: String,
}

/// Starts, probes and stops services
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Starts `service` without waiting for readiness
    async fn start(&self, service: &Service) -> Result<ServiceHandle, LifecycleError>;

    /// Waits until the instance is ready
    ///
    /// Returns `Ok(false)` if `timeout` elapses first and an error if the
    /// instance can no longer become ready.
    async fn await_ready(
        &self,
        handle: &ServiceHandle,
        timeout: Duration,
    ) -> Result<bool, LifecycleError>;

    /// Stops and removes the instance
    async fn stop(&self, handle: &ServiceHandle) -> Result<(), LifecycleError>;
}
