//! The run loop
//!
//! A single loop owns every execution record. Service startups and test runs
//! are spawned onto a [`JoinSet`] and report back as [`Event`]s; the loop
//! applies each event, then starts whatever became eligible. Concurrency is
//! bounded by a semaphore shared by startups and test runs.

use futures::FutureExt;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::lifecycle::{LifecycleError, ServiceBackend, ServiceHandle};
use super::listener::{RunEvent, RunListener, TracingListener};
use super::report::RunReport;
use super::state::{
    NodeState, ServiceRecord, ServiceState, TestRecord, TestState, Transition, millis,
};
use crate::dsl::{Service, Test};
use crate::graph::{DependencyGraph, NodeKind};
use crate::infrastructure::{MetricsCollector, RunMetrics};
use crate::plan::Plan;
use crate::runner::{RunnerDispatch, RunnerError, TestRun};

/// Default number of concurrent startups and test runs
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Default readiness limit per service
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Scheduler settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Concurrent startups and test runs
    pub max_parallel: usize,
    /// Readiness limit per service
    pub readiness_timeout: Duration,
    /// Stop started services once every node is terminal
    pub teardown: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            teardown: true,
        }
    }
}

/// Completion reported by a spawned task
enum Event {
    ServiceSettled {
        name: String,
        handle: Option<ServiceHandle>,
        result: Result<Duration, LifecycleError>,
    },
    TestFinished {
        name: String,
        run: TestRun,
    },
}

/// Drives a [`Plan`] to completion
pub struct Orchestrator {
    services: Arc<dyn ServiceBackend>,
    dispatch: Arc<RunnerDispatch>,
    listener: Arc<dyn RunListener>,
    metrics: Option<Arc<MetricsCollector>>,
    options: OrchestratorOptions,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("dispatch", &self.dispatch)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator logging through [`TracingListener`]
    #[must_use]
    pub fn new(services: Arc<dyn ServiceBackend>, dispatch: RunnerDispatch) -> Self {
        Self {
            services,
            dispatch: Arc::new(dispatch),
            listener: Arc::new(TracingListener),
            metrics: None,
            options: OrchestratorOptions::default(),
        }
    }

    /// Replaces the listener
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn RunListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Records run metrics into `collector`
    #[must_use]
    pub fn with_metrics(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(collector);
        self
    }

    /// Sets scheduler options
    #[must_use]
    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Executes the plan and returns the report
    ///
    /// Runtime failures never abort the run; they are recorded on the node
    /// they happened to and propagate as skips.
    pub async fn run(&self, plan: &Plan) -> RunReport {
        let mut run = RunState::new(self, plan);
        run.execute().await
    }
}

/// Mutable state of one run, owned by the loop
struct RunState<'o> {
    orchestrator: &'o Orchestrator,
    graph: Arc<DependencyGraph>,
    services: HashMap<String, Arc<Service>>,
    tests: HashMap<String, Arc<Test>>,
    service_records: Vec<ServiceRecord>,
    test_records: Vec<TestRecord>,
    service_index: HashMap<String, usize>,
    test_index: HashMap<String, usize>,
    handles: HashMap<String, ServiceHandle>,
    scheduled: HashSet<String>,
    trace: Vec<Transition>,
    tasks: JoinSet<Event>,
    permits: Arc<Semaphore>,
    run_id: Uuid,
    started: Instant,
}

impl<'o> RunState<'o> {
    fn new(orchestrator: &'o Orchestrator, plan: &Plan) -> Self {
        let document = plan.document();
        let graph = Arc::clone(plan.graph());

        let service_records: Vec<ServiceRecord> = document
            .services
            .iter()
            .map(|s| ServiceRecord::pending(&s.name))
            .collect();
        let test_records: Vec<TestRecord> = document
            .tests
            .iter()
            .map(|t| TestRecord::pending(&t.name))
            .collect();

        Self {
            orchestrator,
            services: document
                .services
                .iter()
                .map(|s| (s.name.clone(), Arc::new(s.clone())))
                .collect(),
            tests: document
                .tests
                .iter()
                .map(|t| (t.name.clone(), Arc::new(t.clone())))
                .collect(),
            service_index: service_records
                .iter()
                .enumerate()
                .map(|(i, r)| (r.name.clone(), i))
                .collect(),
            test_index: test_records
                .iter()
                .enumerate()
                .map(|(i, r)| (r.name.clone(), i))
                .collect(),
            service_records,
            test_records,
            graph,
            handles: HashMap::new(),
            scheduled: HashSet::new(),
            trace: Vec::new(),
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(orchestrator.options.max_parallel.max(1))),
            run_id: Uuid::new_v4(),
            started: Instant::now(),
        }
    }

    async fn execute(&mut self) -> RunReport {
        self.emit(RunEvent::RunStarted {
            run_id: self.run_id,
            services: self.service_records.len(),
            tests: self.test_records.len(),
        })
        .await;

        // Tests no service triggers are scheduled from the start.
        let untriggered: Vec<String> = self
            .graph
            .tests()
            .filter(|t| self.graph.test_triggers(t).is_empty())
            .map(str::to_string)
            .collect();
        self.scheduled.extend(untriggered);

        loop {
            self.advance().await;
            let Some(joined) = self.tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(event) => self.apply(event).await,
                Err(join_error) => error!(error = %join_error, "Scheduled task was lost"),
            }
        }

        self.settle_leftovers().await;
        if self.orchestrator.options.teardown {
            self.teardown().await;
        }
        self.finish().await
    }

    /// Starts or skips every node whose preconditions are decided, until
    /// nothing changes.
    async fn advance(&mut self) {
        let graph = Arc::clone(&self.graph);
        loop {
            let mut changed = false;

            let order: Vec<String> = graph
                .service_order()
                .into_iter()
                .map(str::to_string)
                .collect();
            for name in order {
                if self.service_state(&name) != ServiceState::Pending {
                    continue;
                }
                let predecessors = graph.service_predecessors(&name);
                if predecessors
                    .iter()
                    .any(|p| self.service_state(p).is_blocking())
                {
                    self.set_service(&name, ServiceState::Skipped, None).await;
                    changed = true;
                } else if predecessors
                    .iter()
                    .all(|p| self.service_state(p) == ServiceState::Ready)
                {
                    self.spawn_service(&name).await;
                    changed = true;
                }
            }

            let tests: Vec<String> = graph.tests().map(str::to_string).collect();
            for name in tests {
                if self.test_state(&name) != TestState::Pending {
                    continue;
                }
                let needs = graph.test_needs(&name);
                let triggers = graph.test_triggers(&name);
                if needs.iter().any(|s| self.service_state(s).is_blocking()) {
                    self.skip_test(&name, "a needed service is not ready").await;
                    changed = true;
                } else if !triggers.is_empty()
                    && !self.scheduled.contains(&name)
                    && triggers.iter().all(|s| self.service_state(s).is_blocking())
                {
                    self.skip_test(&name, "no triggering service became ready")
                        .await;
                    changed = true;
                } else if self.scheduled.contains(&name)
                    && needs
                        .iter()
                        .all(|s| self.service_state(s) == ServiceState::Ready)
                {
                    self.spawn_test(&name).await;
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }

    async fn spawn_service(&mut self, name: &str) {
        let Some(service) = self.services.get(name).cloned() else {
            return;
        };
        self.set_service(name, ServiceState::Starting, None).await;

        let backend = Arc::clone(&self.orchestrator.services);
        let permits = Arc::clone(&self.permits);
        let readiness_timeout = self.orchestrator.options.readiness_timeout;
        let name = name.to_string();

        self.tasks.spawn(async move {
            let work = async move {
                let _permit = permits.acquire_owned().await.ok();
                let started = Instant::now();
                let timed_out = || LifecycleError::ReadinessTimeout {
                    service: service.name.clone(),
                    timeout: readiness_timeout,
                };

                // One deadline covers start and readiness; elapsing drops the
                // backend future, which kills any CLI child it spawned.
                let deadline = tokio::time::Instant::now() + readiness_timeout;
                let handle = match tokio::time::timeout_at(deadline, backend.start(&service)).await
                {
                    Ok(Ok(handle)) => handle,
                    Ok(Err(err)) => return (None, Err(err)),
                    Err(_) => return (None, Err(timed_out())),
                };
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                let ready =
                    tokio::time::timeout_at(deadline, backend.await_ready(&handle, remaining))
                        .await;
                let result = match ready {
                    Ok(Ok(true)) => Ok(started.elapsed()),
                    Ok(Ok(false)) | Err(_) => Err(timed_out()),
                    Ok(Err(err)) => Err(err),
                };
                (Some(handle), result)
            };
            let (handle, result) = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    (
                        None,
                        Err(LifecycleError::StartFailed {
                            service: name.clone(),
                            reason: "service backend panicked".to_string(),
                        }),
                    )
                });
            Event::ServiceSettled {
                name,
                handle,
                result,
            }
        });
    }

    async fn spawn_test(&mut self, name: &str) {
        let Some(test) = self.tests.get(name).cloned() else {
            return;
        };
        self.set_test(name, TestState::Running).await;

        let dispatch = Arc::clone(&self.orchestrator.dispatch);
        let permits = Arc::clone(&self.permits);
        let name = name.to_string();
        let mode = test.mode;

        self.tasks.spawn(async move {
            let work = async move {
                let _permit = permits.acquire_owned().await.ok();
                dispatch.run(&test).await
            };
            let run = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| TestRun {
                    outcome: None,
                    result: Err(RunnerError::Execution {
                        mode,
                        reason: "runner backend panicked".to_string(),
                    }),
                    attempts: 1,
                    duration: Duration::ZERO,
                });
            Event::TestFinished { name, run }
        });
    }

    async fn apply(&mut self, event: Event) {
        match event {
            Event::ServiceSettled {
                name,
                handle,
                result,
            } => {
                if let Some(handle) = handle {
                    self.handles.insert(name.clone(), handle);
                }
                match result {
                    Ok(startup) => {
                        if let Some(&i) = self.service_index.get(&name) {
                            self.service_records[i].startup_ms = Some(millis(startup));
                        }
                        self.set_service(&name, ServiceState::Ready, None).await;
                        let graph = Arc::clone(&self.graph);
                        let triggered: Vec<String> = graph
                            .triggered_tests(&name)
                            .into_iter()
                            .map(str::to_string)
                            .collect();
                        for test in triggered {
                            debug!(service = %name, test = %test, "Test scheduled");
                            self.scheduled.insert(test);
                        }
                    }
                    Err(err) => {
                        self.set_service(&name, ServiceState::Failed, Some(err.to_string()))
                            .await;
                    }
                }
            }
            Event::TestFinished { name, run } => {
                let to = TestState::from_run(&run);
                if let Some(&i) = self.test_index.get(&name) {
                    self.test_records[i].apply_run(run);
                }
                self.record_test_transition(&name, TestState::Running, to)
                    .await;
            }
        }
    }

    /// Marks nodes that can no longer progress
    async fn settle_leftovers(&mut self) {
        let services: Vec<String> = self.graph.services().map(str::to_string).collect();
        for name in services {
            match self.service_state(&name) {
                ServiceState::Pending => {
                    self.set_service(&name, ServiceState::Skipped, None).await;
                }
                ServiceState::Starting => {
                    let reason = "startup did not complete".to_string();
                    self.set_service(&name, ServiceState::Failed, Some(reason))
                        .await;
                }
                _ => {}
            }
        }

        let tests: Vec<String> = self.graph.tests().map(str::to_string).collect();
        for name in tests {
            match self.test_state(&name) {
                TestState::Pending => self.skip_test(&name, "never became eligible").await,
                TestState::Running => {
                    if let Some(&i) = self.test_index.get(&name) {
                        self.test_records[i].error = Some("runner did not complete".to_string());
                    }
                    self.set_test(&name, TestState::Errored).await;
                }
                _ => {}
            }
        }
    }

    /// Stops started services, dependents before their predecessors
    async fn teardown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        info!(services = self.handles.len(), "Tearing down services");

        for wave in self.teardown_waves() {
            for name in &wave {
                if self.service_state(name) == ServiceState::Ready {
                    self.set_service(name, ServiceState::Stopping, None).await;
                }
            }

            let backend = Arc::clone(&self.orchestrator.services);
            let stops = wave.iter().filter_map(|name| {
                let handle = self.handles.get(name)?.clone();
                let backend = Arc::clone(&backend);
                Some(async move {
                    let result = backend.stop(&handle).await;
                    (handle.service, result)
                })
            });
            let results = join_all(stops).await;

            for (name, result) in results {
                let stopping = self.service_state(&name) == ServiceState::Stopping;
                match result {
                    Ok(()) if stopping => {
                        self.set_service(&name, ServiceState::Stopped, None).await;
                    }
                    Ok(()) => debug!(service = %name, "Stopped service that never became ready"),
                    Err(err) if stopping => {
                        self.set_service(&name, ServiceState::Failed, Some(err.to_string()))
                            .await;
                    }
                    Err(err) => warn!(service = %name, error = %err, "Failed to stop service"),
                }
            }
        }
    }

    /// Groups services holding a handle into waves: a service is stopped only
    /// after every started successor has been stopped.
    fn teardown_waves(&self) -> Vec<Vec<String>> {
        let order: Vec<&str> = self.graph.service_order();
        let mut depth: HashMap<&str, usize> = HashMap::new();
        for &name in order.iter().rev() {
            let level = self
                .graph
                .service_successors(name)
                .iter()
                .filter_map(|s| depth.get(s).map(|d| d + 1))
                .max()
                .unwrap_or(0);
            depth.insert(name, level);
        }

        let mut waves: Vec<Vec<String>> = Vec::new();
        for name in order.iter().rev() {
            if !self.handles.contains_key(*name) {
                continue;
            }
            let level = depth.get(name).copied().unwrap_or(0);
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push((*name).to_string());
        }
        waves.retain(|wave| !wave.is_empty());
        waves
    }

    async fn finish(&mut self) -> RunReport {
        let passed = self
            .test_records
            .iter()
            .all(|t| t.state == TestState::Passed);
        let duration = self.started.elapsed();

        let report = RunReport {
            run_id: self.run_id,
            passed,
            duration_ms: millis(duration),
            services: self.service_records.clone(),
            tests: self.test_records.clone(),
            trace: std::mem::take(&mut self.trace),
        };

        if let Some(collector) = &self.orchestrator.metrics {
            collector.record(RunMetrics::from_report(&report, duration));
        }

        self.emit(RunEvent::RunFinished {
            run_id: self.run_id,
            passed,
        })
        .await;
        report
    }

    fn service_state(&self, name: &str) -> ServiceState {
        self.service_index
            .get(name)
            .map_or(ServiceState::Skipped, |&i| self.service_records[i].state)
    }

    fn test_state(&self, name: &str) -> TestState {
        self.test_index
            .get(name)
            .map_or(TestState::Skipped, |&i| self.test_records[i].state)
    }

    async fn set_service(&mut self, name: &str, to: ServiceState, error: Option<String>) {
        let Some(&i) = self.service_index.get(name) else {
            return;
        };
        let from = self.service_records[i].state;
        self.service_records[i].state = to;
        if error.is_some() {
            self.service_records[i].error.clone_from(&error);
        }
        self.push_trace(
            name,
            NodeKind::Service,
            NodeState::Service(from),
            NodeState::Service(to),
        );
        self.emit(RunEvent::ServiceTransition {
            service: name.to_string(),
            from,
            to,
            error,
        })
        .await;
    }

    async fn set_test(&mut self, name: &str, to: TestState) {
        let Some(&i) = self.test_index.get(name) else {
            return;
        };
        let from = self.test_records[i].state;
        self.test_records[i].state = to;
        self.record_test_transition(name, from, to).await;
    }

    async fn skip_test(&mut self, name: &str, reason: &str) {
        if let Some(&i) = self.test_index.get(name) {
            self.test_records[i].error = Some(reason.to_string());
        }
        self.set_test(name, TestState::Skipped).await;
    }

    async fn record_test_transition(&mut self, name: &str, from: TestState, to: TestState) {
        self.push_trace(
            name,
            NodeKind::Test,
            NodeState::Test(from),
            NodeState::Test(to),
        );
        self.emit(RunEvent::TestTransition {
            test: name.to_string(),
            from,
            to,
        })
        .await;
    }

    fn push_trace(&mut self, node: &str, kind: NodeKind, from: NodeState, to: NodeState) {
        self.trace.push(Transition {
            seq: self.trace.len(),
            node: node.to_string(),
            kind,
            from,
            to,
            elapsed_ms: millis(self.started.elapsed()),
        });
    }

    async fn emit(&self, event: RunEvent) {
        self.orchestrator.listener.on_event(&event).await;
    }
}
