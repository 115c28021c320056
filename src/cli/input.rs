//! Document loading and lazy-input overrides

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

use octopus::dsl::types::LAZY_PREFIX;
use octopus::dsl::{Document, Overrides, collect_inputs};
use octopus::plan::{Plan, PlanError};

/// Reads a YAML or JSON document from disk
pub fn read_document(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    Document::parse(&text).with_context(|| format!("Failed to parse document: {}", path.display()))
}

/// Splits `NAME=VALUE`; the value may itself contain `=`
pub fn parse_assignment(assignment: &str) -> Result<(String, String)> {
    let Some((name, value)) = assignment.split_once('=') else {
        bail!("Invalid override '{assignment}': expected NAME=VALUE");
    };
    let name = name.trim().trim_start_matches(LAZY_PREFIX);
    if name.is_empty() {
        bail!("Invalid override '{assignment}': empty name");
    }
    Ok((name.to_string(), value.to_string()))
}

/// Builds overrides for the document's lazy inputs
///
/// Environment variables named like a declared lazy input come first;
/// `--set` assignments replace them.
pub fn collect_overrides<F>(raw: &Value, sets: &[String], lookup: F) -> Result<Overrides>
where
    F: Fn(&str) -> Option<String>,
{
    let mut overrides = Overrides::new();

    // Malformed input sections are reported by the plan build.
    if let Ok(inputs) = collect_inputs(raw) {
        for input in inputs.iter().filter(|input| input.lazy) {
            if let Some(value) = lookup(&input.name) {
                debug!(input = %input.name, "Override from environment");
                overrides.insert(input.name.clone(), value);
            }
        }
    }

    for assignment in sets {
        let (name, value) = parse_assignment(assignment)?;
        debug!(input = %name, "Override from command line");
        overrides.insert(name, value);
    }
    Ok(overrides)
}

/// Loads, resolves and validates a document
///
/// I/O and parse failures are errors; a structural defect is returned as
/// `Ok(Err(..))` so callers can report it with its own exit code.
pub fn load_plan(path: &Path, sets: &[String]) -> Result<Result<Plan, PlanError>> {
    let raw = read_document(path)?;
    let overrides = collect_overrides(&raw, sets, |name| std::env::var(name).ok())?;
    Ok(Plan::build(&raw, &overrides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("URL=http://x/?a=b").unwrap(),
            ("URL".to_string(), "http://x/?a=b".to_string())
        );
        assert_eq!(parse_assignment("$PORT=1").unwrap().0, "PORT");
        assert!(parse_assignment("PORT").is_err());
        assert!(parse_assignment("=1").is_err());
    }

    #[test]
    fn test_overrides_only_for_lazy_inputs() {
        let raw = json!({ "inputs": [{ "$PORT": "8080" }, { "HOST": "localhost" }] });
        let env: HashMap<&str, &str> = HashMap::from([("PORT", "9090"), ("HOST", "remote")]);

        let overrides =
            collect_overrides(&raw, &[], |name| env.get(name).map(|v| (*v).to_string())).unwrap();
        assert_eq!(overrides.get("PORT").map(String::as_str), Some("9090"));
        assert!(!overrides.contains_key("HOST"));
    }

    #[test]
    fn test_set_flags_win_over_environment() {
        let raw = json!({ "inputs": [{ "$PORT": "8080" }] });
        let sets = vec!["PORT=7070".to_string(), "EXTRA=1".to_string()];
        let overrides = collect_overrides(&raw, &sets, |_| Some("9090".to_string())).unwrap();
        assert_eq!(overrides.get("PORT").map(String::as_str), Some("7070"));
        assert_eq!(overrides.get("EXTRA").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_read_document_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("suite.yaml");
        fs::write(&yaml, "services:\n  - name: db\n    image: postgres\n").unwrap();
        assert_eq!(read_document(&yaml).unwrap()["services"][0]["name"], "db");

        let json_path = dir.path().join("suite.json");
        fs::write(&json_path, r#"{"tests": []}"#).unwrap();
        assert_eq!(read_document(&json_path).unwrap()["tests"], json!([]));

        assert!(read_document(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_load_plan_separates_structural_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.yaml");
        fs::write(&path, "services:\n  - name: web\n    image: nginx\n    depends_on: [db]\n")
            .unwrap();
        let result = load_plan(&path, &[]).unwrap();
        assert!(matches!(result, Err(PlanError::Graph(_))));
    }
}
