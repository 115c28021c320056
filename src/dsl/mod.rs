//! Document domain: inputs, services, tests and placeholder resolution
//!
//! A document goes through two steps before anything runs:
//!
//! 1. [`VariableResolver`] substitutes every placeholder in the raw tree.
//! 2. [`Document::from_value`] decodes the resolved tree into typed
//!    definitions, rejecting unknown fields and runner blocks that do not
//!    match their test mode.

pub mod errors;
pub mod runner;
pub mod types;
pub mod variable;


pub use errors::DslError;
pub use runner::{
    DockerRunner, GrpcRunner, HttpMethod, HttpRunner, PytestRunner, RunnerConfig, ShellRunner,
};
pub use types::{Expect, Input, Service, Test, TestMode};
pub use variable::{Overrides, VariableResolver, Variables, collect_inputs};

use serde::{Deserialize, Serialize};
use serde_json::Value;

const TOP_LEVEL_KEYS: [&str; 4] = ["version", "inputs", "services", "tests"];

/// A fully resolved, typed document
///
/// Definitions are immutable once built; the orchestrator shares them behind
/// an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Document {
    /// Optional document version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Declared inputs with their resolved values
    pub inputs: Vec<Input>,
    /// Services in declaration order
    pub services: Vec<Service>,
    /// Tests in declaration order
    pub tests: Vec<Test>,
}

/// Test block as written, before its runner is decoded for the mode
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTest {
    name: String,
    #[serde(default)]
    desc: String,
    mode: TestMode,
    #[serde(default)]
    needs: Vec<String>,
    runner: Value,
    #[serde(default)]
    expect: Expect,
}

impl Document {
    /// Resolves placeholders in `raw` and decodes the result
    ///
    /// # Errors
    ///
    /// Returns the first resolution or structural error.
    pub fn load(raw: &Value, overrides: &Overrides) -> Result<Self, DslError> {
        let resolved = VariableResolver::new(overrides).resolve(raw)?;
        Self::from_value(&resolved)
    }

    /// Parses YAML (or JSON) text into a raw document tree
    ///
    /// # Errors
    ///
    /// Returns [`DslError::Malformed`] if the text does not parse.
    pub fn parse(text: &str) -> Result<Value, DslError> {
        serde_yaml::from_str::<Value>(text).map_err(|e| DslError::malformed("$", e.to_string()))
    }

    /// Decodes an already resolved tree
    ///
    /// # Errors
    ///
    /// Returns [`DslError::Malformed`] for unknown keys, wrong shapes or
    /// leftover placeholders, and [`DslError::InvalidRunner`] for runner
    /// blocks that do not fit their mode.
    pub fn from_value(resolved: &Value) -> Result<Self, DslError> {
        let Value::Object(sections) = resolved else {
            return Err(DslError::malformed("$", "document must be a mapping"));
        };
        if let Some(key) = sections
            .keys()
            .find(|key| !TOP_LEVEL_KEYS.contains(&key.as_str()))
        {
            return Err(DslError::malformed(key, "unknown top-level section"));
        }

        let version = match sections.get("version") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Number(number)) => Some(number.to_string()),
            Some(_) => return Err(DslError::malformed("version", "expected a string")),
        };

        let inputs = collect_inputs(resolved)?;

        let services = sequence(sections.get("services"), "services")?
            .iter()
            .enumerate()
            .map(|(index, value)| decode_service(index, value))
            .collect::<Result<Vec<_>, _>>()?;

        let tests = sequence(sections.get("tests"), "tests")?
            .iter()
            .enumerate()
            .map(|(index, value)| decode_test(index, value))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            inputs = inputs.len(),
            services = services.len(),
            tests = tests.len(),
            "Decoded document"
        );

        Ok(Self {
            version,
            inputs,
            services,
            tests,
        })
    }

    /// Finds a service by name
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Finds a test by name
    #[must_use]
    pub fn test(&self, name: &str) -> Option<&Test> {
        self.tests.iter().find(|t| t.name == name)
    }

    /// Names of the declared lazy inputs
    pub fn lazy_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|input| input.lazy)
            .map(|input| input.name.as_str())
    }
}

fn sequence<'v>(section: Option<&'v Value>, path: &str) -> Result<&'v [Value], DslError> {
    match section {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(DslError::malformed(path, "expected a sequence")),
    }
}

fn decode_service(index: usize, value: &Value) -> Result<Service, DslError> {
    let path = format!("services[{index}]");
    let service: Service = serde_json::from_value(value.clone())
        .map_err(|e| DslError::malformed(&path, e.to_string()))?;
    check_name(&service.name, &path)?;
    Ok(service)
}

fn decode_test(index: usize, value: &Value) -> Result<Test, DslError> {
    let path = format!("tests[{index}]");
    let raw: RawTest = serde_json::from_value(value.clone())
        .map_err(|e| DslError::malformed(&path, e.to_string()))?;
    check_name(&raw.name, &path)?;

    let runner =
        RunnerConfig::from_value(raw.mode, raw.runner).map_err(|reason| DslError::InvalidRunner {
            test: raw.name.clone(),
            mode: raw.mode.to_string(),
            reason,
        })?;

    Ok(Test {
        name: raw.name,
        desc: raw.desc,
        mode: raw.mode,
        needs: raw.needs,
        runner,
        expect: raw.expect,
    })
}

fn check_name(name: &str, path: &str) -> Result<(), DslError> {
    if name.trim().is_empty() {
        return Err(DslError::malformed(path, "name must not be empty"));
    }
    if variable::has_placeholder(name) {
        return Err(DslError::malformed(path, "name still contains a placeholder"));
    }
    Ok(())
}
