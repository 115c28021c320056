//! Run orchestration
//!
//! Drives a validated [`Plan`](crate::plan::Plan): services start in
//! dependency order through a [`ServiceBackend`], tests run once scheduled
//! and their needs are ready, and every state change lands in the
//! [`RunReport`] trace.

pub mod lifecycle;
pub mod listener;
pub mod report;
pub mod scheduler;
pub mod state;

pub use lifecycle::{LifecycleError, ServiceBackend, ServiceHandle};
pub use listener::{CompositeListener, RunEvent, RunListener, TracingListener};
pub use report::{RunReport, TestSummary};
pub use scheduler::{
    DEFAULT_MAX_PARALLEL, DEFAULT_READINESS_TIMEOUT, Orchestrator, OrchestratorOptions,
};
pub use state::{NodeState, ServiceRecord, ServiceState, TestRecord, TestState, Transition};
