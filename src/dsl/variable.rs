//! Placeholder resolution
//!
//! Resolves `${NAME}` (immediate input) and `${$NAME}` (lazy input)
//! placeholders across a whole document.
//!
//! Resolution happens in three steps:
//!
//! 1. Immediate inputs are bound to their declared values.
//! 2. Lazy inputs are bound to their declared default unless the override
//!    mapping carries a value for them.
//! 3. Every string leaf is substituted pass after pass until nothing changes.
//!    Placeholders are replaced innermost first, so `${DB_${$ENV}}` works.
//!
//! Input values may reference other inputs regardless of declaration order;
//! the bindings are resolved among themselves before any service or test
//! leaf is touched.
//!
//! ```rust
//! use octopus::dsl::{Overrides, VariableResolver};
//! use serde_json::json;
//!
//! let raw = json!({
//!     "inputs": [{ "$HOST_HTTP_PORT": 8080 }],
//!     "services": [{ "name": "web", "image": "nginx", "ports": ["${$HOST_HTTP_PORT}:80"] }],
//! });
//! let resolved = VariableResolver::new(&Overrides::new()).resolve(&raw).unwrap();
//! assert_eq!(resolved["services"][0]["ports"][0], "8080:80");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::errors::DslError;
use super::types::Input;

/// External values for lazy inputs, keyed by name with or without `$`
pub type Overrides = HashMap<String, String>;

/// Innermost placeholder: no `$`, `{` or `}` between the braces except an
/// optional leading lazy marker.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{(\$?[A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("placeholder pattern is valid")
});

/// Document section holding input declarations
pub const INPUTS_KEY: &str = "inputs";

/// Immutable name-to-value bindings, keyed by placeholder token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: HashMap<String, String>,
}

impl Variables {
    /// Binds inputs, applies overrides and resolves inputs among themselves
    ///
    /// # Errors
    ///
    /// Fails on duplicate or colliding declarations, on references to unknown
    /// names and on cyclic references between inputs.
    pub fn bind(inputs: &[Input], overrides: &Overrides) -> Result<Self, DslError> {
        check_declarations(inputs)?;

        let mut raw: HashMap<String, String> = HashMap::with_capacity(inputs.len());
        for input in inputs {
            let value = lookup_override(input, overrides).unwrap_or_else(|| input.value.clone());
            raw.insert(input.token(), value);
        }

        let mut resolver = InputResolution {
            raw: &raw,
            resolved: HashMap::with_capacity(raw.len()),
            stack: Vec::new(),
        };
        // Sorted so that the first reported error does not depend on hash order.
        let mut tokens: Vec<&String> = raw.keys().collect();
        tokens.sort();
        for token in tokens {
            resolver.resolve(token)?;
        }

        Ok(Self {
            values: resolver.resolved,
        })
    }

    /// Looks up a token (`NAME` or `$NAME`)
    #[must_use]
    pub fn get(&self, token: &str) -> Option<&str> {
        self.values.get(token).map(String::as_str)
    }

    /// Number of bound names
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing is bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Upper bound on substitution passes for one string
    fn max_passes(&self) -> usize {
        self.values.len() + 1
    }

    /// Substitutes placeholders in `text` until a fixed point is reached
    ///
    /// # Errors
    ///
    /// Returns [`DslError::UnresolvedReference`] naming the first unknown
    /// token, or [`DslError::CyclicReference`] if the pass bound is exceeded.
    pub fn expand(&self, text: &str, path: &str) -> Result<String, DslError> {
        let mut current = text.to_string();
        for _ in 0..=self.max_passes() {
            let Some(next) = substitute_once(&current, path, |token| self.get(token))? else {
                return Ok(current);
            };
            current = next;
        }
        Err(DslError::CyclicReference {
            chain: placeholder_tokens(&current),
        })
    }
}

/// Resolves raw documents against their own declared inputs
#[derive(Debug, Clone)]
pub struct VariableResolver<'a> {
    overrides: &'a Overrides,
}

impl<'a> VariableResolver<'a> {
    /// Creates a resolver using the given lazy-input overrides
    #[must_use]
    pub fn new(overrides: &'a Overrides) -> Self {
        Self { overrides }
    }

    /// Reads and binds the document's `inputs` section
    ///
    /// # Errors
    ///
    /// See [`Variables::bind`]; also fails on a malformed `inputs` section.
    pub fn bind(&self, raw: &Value) -> Result<Variables, DslError> {
        let inputs = collect_inputs(raw)?;
        Variables::bind(&inputs, self.overrides)
    }

    /// Returns a copy of `raw` with every string leaf resolved
    ///
    /// Mapping keys are left untouched. Input declarations are rewritten to
    /// their resolved values.
    ///
    /// # Errors
    ///
    /// Fails with the first resolution error encountered.
    pub fn resolve(&self, raw: &Value) -> Result<Value, DslError> {
        let variables = self.bind(raw)?;
        tracing::debug!(bindings = variables.len(), "Bound document inputs");

        let Value::Object(sections) = raw else {
            return Err(DslError::malformed("$", "document must be a mapping"));
        };

        let mut resolved = serde_json::Map::with_capacity(sections.len());
        for (key, section) in sections {
            let value = if key == INPUTS_KEY {
                rewrite_inputs(section, &variables)
            } else {
                resolve_value(section, key, &variables)?
            };
            resolved.insert(key.clone(), value);
        }
        Ok(Value::Object(resolved))
    }
}

/// Extracts input declarations from the `inputs` section, in document order
///
/// Accepts a sequence of single-entry mappings or a single mapping.
///
/// # Errors
///
/// Returns [`DslError::Malformed`] for any other shape or for non-scalar
/// values.
pub fn collect_inputs(raw: &Value) -> Result<Vec<Input>, DslError> {
    let Some(section) = raw.get(INPUTS_KEY) else {
        return Ok(Vec::new());
    };

    let mut inputs = Vec::new();
    match section {
        Value::Null => {}
        Value::Array(entries) => {
            for (index, entry) in entries.iter().enumerate() {
                let path = format!("{INPUTS_KEY}[{index}]");
                let Value::Object(map) = entry else {
                    return Err(DslError::malformed(path, "input must be a NAME: value mapping"));
                };
                for (key, value) in map {
                    inputs.push(Input::from_declaration(key, scalar_text(value, &path)?));
                }
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                let path = format!("{INPUTS_KEY}.{key}");
                inputs.push(Input::from_declaration(key, scalar_text(value, &path)?));
            }
        }
        _ => {
            return Err(DslError::malformed(
                INPUTS_KEY,
                "inputs must be a sequence or a mapping",
            ));
        }
    }
    Ok(inputs)
}

fn check_declarations(inputs: &[Input]) -> Result<(), DslError> {
    let mut seen: HashSet<(&str, bool)> = HashSet::with_capacity(inputs.len());
    for input in inputs {
        if input.name.is_empty() {
            return Err(DslError::malformed(INPUTS_KEY, "input name must not be empty"));
        }
        if !seen.insert((input.name.as_str(), input.lazy)) {
            return Err(DslError::DuplicateInput {
                name: input.token(),
            });
        }
        if seen.contains(&(input.name.as_str(), !input.lazy)) {
            return Err(DslError::InputCollision {
                name: input.name.clone(),
            });
        }
    }
    Ok(())
}

fn lookup_override(input: &Input, overrides: &Overrides) -> Option<String> {
    let value = overrides
        .get(&input.token())
        .or_else(|| overrides.get(&input.name))?;
    if !input.lazy {
        tracing::warn!(input = %input.name, "Override replaces an immediate input");
    }
    Some(value.clone())
}

/// Depth-first resolution of input values, with cycle detection.
struct InputResolution<'r> {
    raw: &'r HashMap<String, String>,
    resolved: HashMap<String, String>,
    stack: Vec<String>,
}

impl InputResolution<'_> {
    fn resolve(&mut self, token: &str) -> Result<String, DslError> {
        if let Some(value) = self.resolved.get(token) {
            return Ok(value.clone());
        }
        if let Some(start) = self.stack.iter().position(|t| t == token) {
            let mut chain = self.stack[start..].to_vec();
            chain.push(token.to_string());
            return Err(DslError::CyclicReference { chain });
        }

        let path = format!("{INPUTS_KEY}.{token}");
        let mut current = self.raw[token].clone();
        self.stack.push(token.to_string());

        let max_passes = self.raw.len() + 1;
        let mut passes = 0;
        loop {
            let tokens = placeholder_tokens(&current);
            if tokens.is_empty() {
                break;
            }
            passes += 1;
            if passes > max_passes {
                self.stack.pop();
                return Err(DslError::CyclicReference { chain: tokens });
            }
            for inner in &tokens {
                if !self.raw.contains_key(inner) {
                    return Err(DslError::UnresolvedReference {
                        token: inner.clone(),
                        path,
                    });
                }
                self.resolve(inner)?;
            }
            let next = substitute_once(&current, &path, |t| {
                self.resolved.get(t).map(String::as_str)
            })?;
            if let Some(next) = next {
                current = next;
            }
        }

        self.stack.pop();
        self.resolved.insert(token.to_string(), current.clone());
        Ok(current)
    }
}

/// Replaces every innermost placeholder once.
///
/// Returns `Ok(None)` when `text` holds no placeholder.
fn substitute_once<'v, F>(text: &str, path: &str, lookup: F) -> Result<Option<String>, DslError>
where
    F: Fn(&str) -> Option<&'v str>,
{
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    let mut found = false;

    for caps in PLACEHOLDER.captures_iter(text) {
        let (Some(whole), Some(token)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = lookup(token.as_str()).ok_or_else(|| DslError::UnresolvedReference {
            token: token.as_str().to_string(),
            path: path.to_string(),
        })?;
        output.push_str(&text[last..whole.start()]);
        output.push_str(value);
        last = whole.end();
        found = true;
    }

    if !found {
        return Ok(None);
    }
    output.push_str(&text[last..]);
    Ok(Some(output))
}

fn placeholder_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(text) {
        if let Some(token) = caps.get(1)
            && !tokens.iter().any(|t| t == token.as_str())
        {
            tokens.push(token.as_str().to_string());
        }
    }
    tokens
}

fn resolve_value(value: &Value, path: &str, variables: &Variables) -> Result<Value, DslError> {
    match value {
        Value::String(text) => Ok(Value::String(variables.expand(text, path)?)),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| resolve_value(item, &format!("{path}[{index}]"), variables))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                let value = resolve_value(item, &format!("{path}.{key}"), variables)?;
                resolved.insert(key.clone(), value);
            }
            Ok(Value::Object(resolved))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn rewrite_inputs(section: &Value, variables: &Variables) -> Value {
    let rewrite_entry = |key: &String, value: &Value| {
        let input = Input::from_declaration(key, String::new());
        let resolved = variables
            .get(&input.token())
            .map_or_else(|| value.clone(), |v| Value::String(v.to_string()));
        (key.clone(), resolved)
    };

    match section {
        Value::Array(entries) => Value::Array(
            entries
                .iter()
                .map(|entry| match entry {
                    Value::Object(map) => {
                        Value::Object(map.iter().map(|(k, v)| rewrite_entry(k, v)).collect())
                    }
                    other => other.clone(),
                })
                .collect(),
        ),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| rewrite_entry(k, v)).collect()),
        other => other.clone(),
    }
}

fn scalar_text(value: &Value, path: &str) -> Result<String, DslError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => {
            Err(DslError::malformed(path, "input value must be a scalar"))
        }
    }
}

/// Returns true if `text` still contains a resolvable placeholder
#[must_use]
pub fn has_placeholder(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn resolve(raw: &Value) -> Result<Value, DslError> {
        VariableResolver::new(&Overrides::new()).resolve(raw)
    }

    #[test]
    fn test_lazy_port_mapping() {
        let raw = json!({
            "inputs": [{ "$HOST_HTTP_PORT": 8080 }],
            "services": [{ "name": "S", "image": "nginx", "ports": ["${$HOST_HTTP_PORT}:80"] }],
        });
        let resolved = resolve(&raw).unwrap();
        assert_eq!(resolved["services"][0]["ports"][0], json!("8080:80"));
    }

    #[test]
    fn test_override_wins_for_lazy_input() {
        let raw = json!({
            "inputs": [{ "$PORT": "8080" }],
            "services": [{ "name": "S", "image": "nginx", "ports": ["${$PORT}:80"] }],
        });
        let overrides = Overrides::from([("PORT".to_string(), "9090".to_string())]);
        let resolved = VariableResolver::new(&overrides).resolve(&raw).unwrap();
        assert_eq!(resolved["services"][0]["ports"][0], json!("9090:80"));
    }

    #[test]
    fn test_override_accepts_prefixed_key() {
        let inputs = vec![Input::lazy("PORT", "1")];
        let overrides = Overrides::from([("$PORT".to_string(), "2".to_string())]);
        let variables = Variables::bind(&inputs, &overrides).unwrap();
        assert_eq!(variables.get("$PORT"), Some("2"));
    }

    #[test]
    fn test_override_replaces_immediate_input() {
        let inputs = vec![Input::immediate("TAG", "latest")];
        let overrides = Overrides::from([("TAG".to_string(), "v2".to_string())]);
        let variables = Variables::bind(&inputs, &overrides).unwrap();
        assert_eq!(variables.get("TAG"), Some("v2"));
    }

    #[test]
    fn test_inputs_resolve_out_of_order() {
        let raw = json!({
            "inputs": [
                { "URL": "http://${HOST}:${$PORT}" },
                { "HOST": "localhost" },
                { "$PORT": "8080" },
            ],
            "tests": [{ "runner": { "endpoint": "${URL}/health" } }],
        });
        let resolved = resolve(&raw).unwrap();
        assert_eq!(
            resolved["tests"][0]["runner"]["endpoint"],
            json!("http://localhost:8080/health")
        );
        assert_eq!(resolved["inputs"][0]["URL"], json!("http://localhost:8080"));
    }

    #[test]
    fn test_nested_placeholder_resolves_innermost_first() {
        let raw = json!({
            "inputs": { "$ENV": "prod", "DB_prod": "db.prod.internal" },
            "services": [{ "name": "api", "image": "api", "envs": ["DB=${DB_${$ENV}}"] }],
        });
        let resolved = resolve(&raw).unwrap();
        assert_eq!(
            resolved["services"][0]["envs"][0],
            json!("DB=db.prod.internal")
        );
    }

    #[test]
    fn test_unresolved_reference_names_token() {
        let raw = json!({
            "services": [{ "name": "S", "image": "${undeclared}" }],
        });
        let err = resolve(&raw).unwrap_err();
        assert_eq!(
            err,
            DslError::UnresolvedReference {
                token: "undeclared".to_string(),
                path: "services[0].image".to_string(),
            }
        );
    }

    #[test]
    fn test_unresolved_reference_inside_input() {
        let raw = json!({ "inputs": [{ "A": "${missing}" }] });
        let err = resolve(&raw).unwrap_err();
        assert!(matches!(err, DslError::UnresolvedReference { token, .. } if token == "missing"));
    }

    #[test]
    fn test_cyclic_inputs_are_rejected() {
        let raw = json!({ "inputs": [{ "A": "${B}" }, { "B": "${A}" }] });
        let err = resolve(&raw).unwrap_err();
        assert_eq!(
            err,
            DslError::CyclicReference {
                chain: vec!["A".to_string(), "B".to_string(), "A".to_string()],
            }
        );
    }

    #[test]
    fn test_self_referencing_input_is_cyclic() {
        let raw = json!({ "inputs": [{ "$A": "x${$A}" }] });
        assert!(matches!(
            resolve(&raw).unwrap_err(),
            DslError::CyclicReference { .. }
        ));
    }

    #[test]
    fn test_duplicate_input_is_rejected() {
        let raw = json!({ "inputs": [{ "A": "1" }, { "A": "2" }] });
        assert_eq!(
            resolve(&raw).unwrap_err(),
            DslError::DuplicateInput {
                name: "A".to_string()
            }
        );
    }

    #[test]
    fn test_immediate_lazy_collision_is_flagged() {
        let raw = json!({ "inputs": [{ "PORT": "1" }, { "$PORT": "2" }] });
        assert_eq!(
            resolve(&raw).unwrap_err(),
            DslError::InputCollision {
                name: "PORT".to_string()
            }
        );
    }

    #[test]
    fn test_non_string_leaves_are_preserved() {
        let raw = json!({
            "tests": [{ "expect": { "exit_code": 0, "flag": true, "none": null } }],
        });
        assert_eq!(resolve(&raw).unwrap(), raw);
    }

    #[test]
    fn test_keys_are_not_substituted() {
        let raw = json!({
            "inputs": [{ "K": "v" }],
            "tests": [{ "${K}": "${K}" }],
        });
        let resolved = resolve(&raw).unwrap();
        assert_eq!(resolved["tests"][0]["${K}"], json!("v"));
    }

    #[test]
    fn test_non_identifier_braces_are_left_alone() {
        let raw = json!({ "tests": [{ "cmd": "echo ${HOME:-/root} ${ spaced }" }] });
        assert_eq!(resolve(&raw).unwrap(), raw);
    }

    #[test]
    fn test_malformed_inputs_section() {
        let raw = json!({ "inputs": "A=1" });
        assert!(matches!(
            resolve(&raw).unwrap_err(),
            DslError::Malformed { .. }
        ));
    }

    #[test]
    fn test_has_placeholder() {
        assert!(has_placeholder("${A}"));
        assert!(has_placeholder("x${$A}y"));
        assert!(!has_placeholder("$A"));
    }

    proptest! {
        #[test]
        fn prop_resolution_is_idempotent(
            host in "[a-z]{1,8}",
            port in 1u16..,
            suffix in "[a-z/]{0,6}",
        ) {
            let raw = json!({
                "inputs": [
                    { "URL": format!("http://${{HOST}}:${{$PORT}}/{suffix}") },
                    { "HOST": host },
                    { "$PORT": port },
                ],
                "services": [{ "name": "${HOST}", "image": "img", "ports": ["${$PORT}:80"] }],
                "tests": [{ "runner": { "endpoint": "${URL}" } }],
            });
            let once = resolve(&raw).unwrap();
            let again = resolve(&raw).unwrap();
            prop_assert_eq!(&once, &again);
            let twice = resolve(&once).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
