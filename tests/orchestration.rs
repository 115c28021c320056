//! End-to-end scheduling tests with in-memory service and runner backends.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use octopus::dsl::{Overrides, RunnerConfig, Service};
use octopus::infrastructure::MetricsCollector;
use octopus::orchestrator::{
    LifecycleError, NodeState, Orchestrator, OrchestratorOptions, RunEvent, RunListener,
    RunReport, ServiceBackend, ServiceHandle, ServiceState, TestState,
};
use octopus::plan::Plan;
use octopus::runner::{Outcome, RetryPolicy, RunnerBackend, RunnerDispatch, RunnerError};
use octopus::TestMode;

/// Records lifecycle calls; selected services fail at a given step.
#[derive(Default)]
struct FakeServices {
    calls: Mutex<Vec<String>>,
    fail_start: HashSet<String>,
    never_ready: HashSet<String>,
    hang_start: HashSet<String>,
    hang_ready: HashSet<String>,
    fail_stop: HashSet<String>,
}

impl FakeServices {
    fn names(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn position(&self, call: &str) -> usize {
        self.calls()
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("no call '{call}'"))
    }
}

#[async_trait]
impl ServiceBackend for FakeServices {
    async fn start(&self, service: &Service) -> Result<ServiceHandle, LifecycleError> {
        self.calls.lock().push(format!("start {}", service.name));
        if self.fail_start.contains(&service.name) {
            return Err(LifecycleError::StartFailed {
                service: service.name.clone(),
                reason: "image not found".to_string(),
            });
        }
        if self.hang_start.contains(&service.name) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(ServiceHandle {
            service: service.name.clone(),
            id: format!("id-{}", service.name),
        })
    }

    async fn await_ready(
        &self,
        handle: &ServiceHandle,
        timeout: Duration,
    ) -> Result<bool, LifecycleError> {
        if self.hang_ready.contains(&handle.service) {
            std::future::pending::<()>().await;
        }
        if self.never_ready.contains(&handle.service) {
            tokio::time::sleep(timeout).await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn stop(&self, handle: &ServiceHandle) -> Result<(), LifecycleError> {
        self.calls.lock().push(format!("stop {}", handle.service));
        if self.fail_stop.contains(&handle.service) {
            return Err(LifecycleError::StopFailed {
                service: handle.service.clone(),
                reason: "container busy".to_string(),
            });
        }
        Ok(())
    }
}

/// Shell runner stand-in: prints its first argument, or fails on `error`.
#[derive(Default)]
struct EchoRunner {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl RunnerBackend for EchoRunner {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, config: &RunnerConfig) -> Result<Outcome, RunnerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let RunnerConfig::Shell(shell) = config else {
            return Err(RunnerError::Execution {
                mode: config.mode(),
                reason: "unexpected runner".to_string(),
            });
        };
        let word = shell.cmd.first().cloned().unwrap_or_default();
        if word == "error" {
            return Err(RunnerError::Execution {
                mode: TestMode::Shell,
                reason: "connection refused".to_string(),
            });
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        Ok(Outcome::process(0, word, ""))
    }
}

#[derive(Default)]
struct Recording(Mutex<Vec<RunEvent>>);

#[async_trait]
impl RunListener for Recording {
    async fn on_event(&self, event: &RunEvent) {
        self.0.lock().push(event.clone());
    }
}

fn shell_test(name: &str, word: &str, needs: &[&str]) -> Value {
    json!({
        "name": name,
        "mode": "shell",
        "needs": needs,
        "runner": { "cmd": [word] },
        "expect": { "exit_code": 0, "stdout": "ok" },
    })
}

fn plan(raw: &Value) -> Plan {
    Plan::build(raw, &Overrides::new()).unwrap()
}

fn orchestrator(services: &Arc<FakeServices>, runner: &Arc<EchoRunner>) -> Orchestrator {
    let dispatch = RunnerDispatch::new()
        .with_backend(TestMode::Shell, Arc::clone(runner) as Arc<dyn RunnerBackend>)
        .with_retry(RetryPolicy {
            max_attempts: 2,
            backoff: Duration::ZERO,
        });
    Orchestrator::new(Arc::clone(services) as Arc<dyn ServiceBackend>, dispatch)
}

/// Sequence number of the first transition of `node` into `to`
fn seq(report: &RunReport, node: &str, to: NodeState) -> usize {
    report
        .trace
        .iter()
        .find(|t| t.node == node && t.to == to)
        .map(|t| t.seq)
        .unwrap_or_else(|| panic!("'{node}' never became {to}"))
}

fn ready(report: &RunReport, service: &str) -> usize {
    seq(report, service, NodeState::Service(ServiceState::Ready))
}

/// No service starts before its predecessors are ready and no test runs
/// before its needs are ready.
fn assert_ordering(plan: &Plan, report: &RunReport) {
    let graph = plan.graph();
    for transition in &report.trace {
        match transition.to {
            NodeState::Service(ServiceState::Starting) => {
                for predecessor in graph.service_predecessors(&transition.node) {
                    assert!(ready(report, predecessor) < transition.seq);
                }
            }
            NodeState::Test(TestState::Running) => {
                for need in graph.test_needs(&transition.node) {
                    assert!(ready(report, need) < transition.seq);
                }
            }
            _ => {}
        }
    }
}

fn web_stack() -> Value {
    json!({
        "services": [
            { "name": "web", "image": "nginx", "depends_on": ["db", "cache"], "trigger": ["health"] },
            { "name": "db", "image": "postgres" },
            { "name": "cache", "image": "redis" },
        ],
        "tests": [
            shell_test("health", "ok", &["web"]),
            shell_test("unit", "ok", &[]),
        ],
    })
}

#[tokio::test]
async fn test_services_start_in_dependency_order() {
    let services = Arc::new(FakeServices::default());
    let runner = Arc::new(EchoRunner::default());
    let plan = plan(&web_stack());

    let report = orchestrator(&services, &runner).run(&plan).await;

    assert!(report.passed);
    assert_ordering(&plan, &report);
    let web_starting = seq(&report, "web", NodeState::Service(ServiceState::Starting));
    assert!(ready(&report, "db") < web_starting);
    assert!(ready(&report, "cache") < web_starting);
    assert!(ready(&report, "web") < seq(&report, "health", NodeState::Test(TestState::Running)));

    for service in ["web", "db", "cache"] {
        assert_eq!(report.service_state(service), Some(ServiceState::Stopped));
        assert!(report.service(service).unwrap().startup_ms.is_some());
    }
}

#[tokio::test]
async fn test_teardown_stops_dependents_first() {
    let services = Arc::new(FakeServices::default());
    let runner = Arc::new(EchoRunner::default());

    orchestrator(&services, &runner)
        .run(&plan(&web_stack()))
        .await;

    let stop_web = services.position("stop web");
    assert!(stop_web < services.position("stop db"));
    assert!(stop_web < services.position("stop cache"));
}

#[tokio::test]
async fn test_failed_dependency_skips_dependents() {
    let services = Arc::new(FakeServices {
        fail_start: FakeServices::names(&["db"]),
        ..FakeServices::default()
    });
    let runner = Arc::new(EchoRunner::default());

    let report = orchestrator(&services, &runner)
        .run(&plan(&web_stack()))
        .await;

    assert!(!report.passed);
    assert_eq!(report.service_state("db"), Some(ServiceState::Failed));
    assert!(report.service("db").unwrap().error.as_deref().unwrap().contains("image not found"));
    assert_eq!(report.service_state("web"), Some(ServiceState::Skipped));
    assert_eq!(report.test_state("health"), Some(TestState::Skipped));
    // Independent work still runs.
    assert_eq!(report.service_state("cache"), Some(ServiceState::Stopped));
    assert_eq!(report.test_state("unit"), Some(TestState::Passed));
    assert!(!services.calls().contains(&"start web".to_string()));
}

#[tokio::test]
async fn test_readiness_timeout_fails_service() {
    let services = Arc::new(FakeServices {
        never_ready: FakeServices::names(&["db"]),
        ..FakeServices::default()
    });
    let runner = Arc::new(EchoRunner::default());
    let options = OrchestratorOptions {
        readiness_timeout: Duration::from_millis(50),
        ..OrchestratorOptions::default()
    };

    let report = orchestrator(&services, &runner)
        .with_options(options)
        .run(&plan(&web_stack()))
        .await;

    assert_eq!(report.service_state("db"), Some(ServiceState::Failed));
    assert!(report.service("db").unwrap().error.as_deref().unwrap().contains("not ready"));
    assert_eq!(report.service_state("web"), Some(ServiceState::Skipped));
    // The started container is still removed.
    assert!(services.calls().contains(&"stop db".to_string()));
}

#[tokio::test]
async fn test_readiness_timeout_bounds_hanging_backend() {
    let services = Arc::new(FakeServices {
        hang_ready: FakeServices::names(&["db"]),
        hang_start: FakeServices::names(&["cache"]),
        ..FakeServices::default()
    });
    let runner = Arc::new(EchoRunner::default());
    let options = OrchestratorOptions {
        readiness_timeout: Duration::from_millis(100),
        ..OrchestratorOptions::default()
    };
    let orchestrator = orchestrator(&services, &runner).with_options(options);
    let plan = plan(&web_stack());

    let report = tokio::time::timeout(Duration::from_secs(3), orchestrator.run(&plan))
        .await
        .expect("run must finish once the readiness timeout elapses");

    assert_eq!(report.service_state("db"), Some(ServiceState::Failed));
    assert_eq!(report.service_state("cache"), Some(ServiceState::Failed));
    assert!(report.service("db").unwrap().error.as_deref().unwrap().contains("not ready"));
    assert_eq!(report.service_state("web"), Some(ServiceState::Skipped));
    assert!(!report.passed);
    // db returned a handle before hanging, so it is still removed; cache never did.
    assert!(services.calls().contains(&"stop db".to_string()));
    assert!(!services.calls().contains(&"stop cache".to_string()));
}

#[tokio::test]
async fn test_next_orders_successor() {
    let raw = json!({
        "services": [
            { "name": "migrate", "image": "flyway", "next": ["api"] },
            { "name": "api", "image": "api" },
        ],
    });
    let services = Arc::new(FakeServices::default());
    let runner = Arc::new(EchoRunner::default());
    let plan = plan(&raw);

    let report = orchestrator(&services, &runner).run(&plan).await;

    assert!(ready(&report, "migrate") < seq(&report, "api", NodeState::Service(ServiceState::Starting)));
    assert_ordering(&plan, &report);
    // No tests: the verdict passes vacuously.
    assert!(report.passed);
}

#[tokio::test]
async fn test_trigger_schedules_tests() {
    let raw = json!({
        "services": [
            { "name": "api", "image": "api", "trigger": ["smoke"] },
            { "name": "broken", "image": "broken", "trigger": ["never"] },
        ],
        "tests": [
            shell_test("smoke", "ok", &[]),
            shell_test("never", "ok", &[]),
        ],
    });
    let services = Arc::new(FakeServices {
        fail_start: FakeServices::names(&["broken"]),
        ..FakeServices::default()
    });
    let runner = Arc::new(EchoRunner::default());

    let report = orchestrator(&services, &runner).run(&plan(&raw)).await;

    assert_eq!(report.test_state("smoke"), Some(TestState::Passed));
    assert!(ready(&report, "api") < seq(&report, "smoke", NodeState::Test(TestState::Running)));
    assert_eq!(report.test_state("never"), Some(TestState::Skipped));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_verdicts_and_retries() {
    let raw = json!({
        "tests": [
            shell_test("passes", "ok", &[]),
            shell_test("mismatch", "bye", &[]),
            shell_test("transport", "error", &[]),
        ],
    });
    let services = Arc::new(FakeServices::default());
    let runner = Arc::new(EchoRunner::default());

    let report = orchestrator(&services, &runner).run(&plan(&raw)).await;

    assert!(!report.passed);
    assert_eq!(report.test_state("passes"), Some(TestState::Passed));

    let mismatch = report.test("mismatch").unwrap();
    assert_eq!(mismatch.state, TestState::Failed);
    assert_eq!(mismatch.attempts, 1);
    assert_eq!(mismatch.mismatches.len(), 1);
    assert_eq!(mismatch.mismatches[0].field, "stdout");
    assert_eq!(mismatch.mismatches[0].actual, "bye");

    let transport = report.test("transport").unwrap();
    assert_eq!(transport.state, TestState::Errored);
    assert_eq!(transport.attempts, 2);
    assert!(transport.error.as_deref().unwrap().contains("connection refused"));

    let summary = report.summary();
    assert_eq!((summary.passed, summary.failed, summary.errored), (1, 1, 1));
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let tests: Vec<Value> = (0..6)
        .map(|i| shell_test(&format!("t{i}"), "ok", &[]))
        .collect();
    let raw = json!({ "tests": tests });
    let services = Arc::new(FakeServices::default());
    let runner = Arc::new(EchoRunner {
        delay: Duration::from_millis(30),
        ..EchoRunner::default()
    });
    let options = OrchestratorOptions {
        max_parallel: 2,
        ..OrchestratorOptions::default()
    };

    let report = orchestrator(&services, &runner)
        .with_options(options)
        .run(&plan(&raw))
        .await;

    assert!(report.passed);
    let peak = runner.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
}

#[tokio::test]
async fn test_teardown_can_be_disabled() {
    let services = Arc::new(FakeServices::default());
    let runner = Arc::new(EchoRunner::default());
    let options = OrchestratorOptions {
        teardown: false,
        ..OrchestratorOptions::default()
    };

    let report = orchestrator(&services, &runner)
        .with_options(options)
        .run(&plan(&web_stack()))
        .await;

    assert_eq!(report.service_state("web"), Some(ServiceState::Ready));
    assert!(services.calls().iter().all(|c| c.starts_with("start")));
}

#[tokio::test]
async fn test_stop_failure_marks_service_failed() {
    let services = Arc::new(FakeServices {
        fail_stop: FakeServices::names(&["db"]),
        ..FakeServices::default()
    });
    let runner = Arc::new(EchoRunner::default());

    let report = orchestrator(&services, &runner)
        .run(&plan(&web_stack()))
        .await;

    assert_eq!(report.service_state("db"), Some(ServiceState::Failed));
    assert!(report.service("db").unwrap().error.as_deref().unwrap().contains("container busy"));
    // Teardown problems do not change the test verdict.
    assert!(report.passed);
}

#[tokio::test]
async fn test_listener_and_metrics_observe_run() {
    let services = Arc::new(FakeServices::default());
    let runner = Arc::new(EchoRunner::default());
    let listener = Arc::new(Recording::default());
    let metrics = Arc::new(MetricsCollector::new());

    let report = orchestrator(&services, &runner)
        .with_listener(Arc::clone(&listener) as Arc<dyn RunListener>)
        .with_metrics(Arc::clone(&metrics))
        .run(&plan(&web_stack()))
        .await;

    let events = listener.0.lock().clone();
    assert_eq!(
        events.first(),
        Some(&RunEvent::RunStarted {
            run_id: report.run_id,
            services: 3,
            tests: 2,
        })
    );
    assert_eq!(
        events.last(),
        Some(&RunEvent::RunFinished {
            run_id: report.run_id,
            passed: true,
        })
    );
    let transitions = events
        .iter()
        .filter(|e| matches!(e, RunEvent::ServiceTransition { .. } | RunEvent::TestTransition { .. }))
        .count();
    assert_eq!(transitions, report.trace.len());

    let recorded = metrics.get(&report.run_id).unwrap();
    assert_eq!(recorded.services_ready, 3);
    assert_eq!(recorded.tests_passed, 2);
    assert!(recorded.passed);
}

#[tokio::test]
async fn test_report_serializes_trace() {
    let services = Arc::new(FakeServices::default());
    let runner = Arc::new(EchoRunner::default());

    let report = orchestrator(&services, &runner)
        .run(&plan(&web_stack()))
        .await;

    let json: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["passed"], true);
    assert_eq!(json["trace"][0]["seq"], 0);
    assert!(report.to_string().contains("Result: PASS"));
}
