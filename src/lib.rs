//! # Octopus - declarative service/test pipelines
//!
//! Octopus reads a configuration document that declares inputs, containerized
//! services and tests, resolves `${NAME}` placeholders, builds a validated
//! dependency graph and drives services and tests to completion.
//!
//! ## Stages
//!
//! 1. **Resolve** ([`dsl`]): inputs are bound (lazy `$NAME` inputs may be
//!    overridden at run time) and every placeholder is expanded.
//! 2. **Plan** ([`plan`], [`graph`]): services and tests become nodes joined
//!    by `depends_on`, `next`, `trigger` and `needs` edges; unknown
//!    references and ordering cycles are rejected before anything starts.
//! 3. **Run** ([`orchestrator`], [`runner`]): services start in dependency
//!    order, tests run through a backend for their mode, and the
//!    [`RunReport`] records every node's terminal state.
//!
//! ```no_run
//! use std::sync::Arc;
//! use octopus::prelude::*;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let raw = Document::parse(&std::fs::read_to_string("suite.yaml")?)?;
//! let plan = Plan::build(&raw, &Overrides::new())?;
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(ContainerBackend::default()),
//!     RunnerDispatch::with_default_backends("docker"),
//! );
//! let report = orchestrator.run(&plan).await;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of
//! - Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <https://www.apache.org/licenses/LICENSE-2.0>)
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or <https://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod dsl;
pub mod graph;
pub mod infrastructure;
pub mod orchestrator;
pub mod plan;
pub mod runner;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use dsl::{Document, DslError, Input, Overrides, RunnerConfig, Service, Test, TestMode};
pub use graph::{DependencyGraph, EdgeKind, GraphError, NodeKind};
pub use infrastructure::{
    Config, ContainerBackend, ContainerRuntime, MetricsCollector, RunMetrics, init_logging,
};
pub use orchestrator::{
    LifecycleError, Orchestrator, OrchestratorOptions, RunReport, ServiceBackend, ServiceState,
    TestState,
};
pub use plan::{Plan, PlanError};
pub use runner::{Outcome, RunnerBackend, RunnerDispatch, RunnerError, Verdict};

/// Version of the octopus crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
