//! Run event listeners
//!
//! Listeners observe a run without influencing it. The scheduler awaits each
//! listener call in order, so a listener sees transitions exactly as they
//! are recorded in the trace.

use async_trait::async_trait;
use tracing::{Level, event};
use uuid::Uuid;

use super::state::{ServiceState, TestState};

/// Events emitted during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// The scheduler began
    RunStarted {
        /// Run id
        run_id: Uuid,
        /// Declared services
        services: usize,
        /// Declared tests
        tests: usize,
    },
    /// A service changed state
    ServiceTransition {
        /// Service name
        service: String,
        /// Previous state
        from: ServiceState,
        /// New state
        to: ServiceState,
        /// Failure, if the new state is `Failed`
        error: Option<String>,
    },
    /// A test changed state
    TestTransition {
        /// Test name
        test: String,
        /// Previous state
        from: TestState,
        /// New state
        to: TestState,
    },
    /// Every node is terminal and teardown is done
    RunFinished {
        /// Run id
        run_id: Uuid,
        /// Overall verdict
        passed: bool,
    },
}

/// Receives run events
#[async_trait]
pub trait RunListener: Send + Sync {
    /// Called for every event, in order
    async fn on_event(&self, event: &RunEvent);
}

/// Forwards events to several listeners
#[derive(Default)]
pub struct CompositeListener {
    listeners: Vec<Box<dyn RunListener>>,
}

impl std::fmt::Debug for CompositeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeListener")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl CompositeListener {
    /// Creates an empty composite listener
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener
    pub fn add<L: RunListener + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener));
    }

    /// Number of registered listeners
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[async_trait]
impl RunListener for CompositeListener {
    async fn on_event(&self, event: &RunEvent) {
        for listener in &self.listeners {
            listener.on_event(event).await;
        }
    }
}

/// Logs events through `tracing`
#[derive(Debug, Default)]
pub struct TracingListener;

#[async_trait]
impl RunListener for TracingListener {
    async fn on_event(&self, run_event: &RunEvent) {
        match run_event {
            RunEvent::RunStarted {
                run_id,
                services,
                tests,
            } => {
                event!(Level::INFO, run = %run_id, services, tests, "Run started");
            }
            RunEvent::ServiceTransition {
                service,
                to: ServiceState::Failed,
                error,
                ..
            } => {
                event!(
                    Level::ERROR,
                    service = %service,
                    error = error.as_deref().unwrap_or(""),
                    "Service failed"
                );
            }
            RunEvent::ServiceTransition {
                service,
                to: ServiceState::Skipped,
                ..
            } => {
                event!(Level::WARN, service = %service, "Service skipped");
            }
            RunEvent::ServiceTransition { service, from, to, .. } => {
                event!(
                    Level::INFO,
                    service = %service,
                    from = %from,
                    to = %to,
                    "Service state changed"
                );
            }
            RunEvent::TestTransition { test, to, .. } => match to {
                TestState::Running => event!(Level::DEBUG, test = %test, "Test running"),
                TestState::Passed => event!(Level::INFO, test = %test, "Test passed"),
                TestState::Failed | TestState::Errored => {
                    event!(Level::WARN, test = %test, state = %to, "Test did not pass");
                }
                TestState::Skipped => event!(Level::WARN, test = %test, "Test skipped"),
                TestState::Pending => {}
            },
            RunEvent::RunFinished { run_id, passed } => {
                event!(Level::INFO, run = %run_id, passed, "Run finished");
            }
        }
    }
}
