//! Prelude module for common imports

pub use crate::dsl::{
    Document, DslError, Expect, Input, Overrides, RunnerConfig, Service, Test, TestMode,
    VariableResolver,
};
pub use crate::graph::{DependencyGraph, EdgeKind, GraphError, NodeKind};
pub use crate::infrastructure::{Config, ContainerBackend, ContainerRuntime, MetricsCollector};
pub use crate::orchestrator::{
    CompositeListener, LifecycleError, Orchestrator, OrchestratorOptions, RunEvent, RunListener,
    RunReport, ServiceBackend, ServiceHandle, ServiceState, TestState, TracingListener,
};
pub use crate::plan::{Plan, PlanError};
pub use crate::runner::{
    ExecutionTimeouts, Outcome, RetryPolicy, RunnerBackend, RunnerDispatch, RunnerError, TestRun,
    Verdict,
};
