//! Infrastructure layer
//!
//! This module contains external integrations and adapters.

mod config;
pub mod container;
mod logging;
mod metrics;

pub use config::{
    Config, ConfigError, ENV_CONTAINER_RUNTIME, ENV_LOG_LEVEL, ENV_MAX_PARALLEL,
    ExecutionTimeoutConfig, RetryConfig,
};
pub use container::{ContainerBackend, ContainerRuntime};
pub use logging::init_logging;
pub use metrics::{MetricsCollector, RunMetrics};
