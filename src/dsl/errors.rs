//! Error types for the document domain

use thiserror::Error;

/// Errors raised while resolving or loading a document.
///
/// These are structural defects: a run that hits one of them never starts a
/// service or runs a test.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DslError {
    /// A placeholder names no declared input
    #[error("Unresolved reference '${{{token}}}' at {path}")]
    UnresolvedReference {
        /// The token inside `${...}`.
        token: String,
        /// Document path of the string leaf holding the token.
        path: String,
    },

    /// Input values reference each other in a loop
    #[error("Cyclic input reference: {}", .chain.join(" -> "))]
    CyclicReference {
        /// Input names forming the loop, first name repeated at the end.
        chain: Vec<String>,
    },

    /// An input is declared twice
    #[error("Duplicate input '{name}'")]
    DuplicateInput {
        /// The repeated name.
        name: String,
    },

    /// An immediate input and a lazy input share a name
    #[error("Input '{name}' is declared both as immediate and as lazy '${name}'")]
    InputCollision {
        /// The bare name declared twice.
        name: String,
    },

    /// The document does not have the expected shape
    #[error("Malformed document at {path}: {reason}")]
    Malformed {
        /// Document path of the offending node.
        path: String,
        /// What was wrong.
        reason: String,
    },

    /// A test's runner block does not fit its mode
    #[error("Invalid runner for test '{test}' (mode {mode}): {reason}")]
    InvalidRunner {
        /// Test name.
        test: String,
        /// Declared mode.
        mode: String,
        /// What was wrong.
        reason: String,
    },
}

impl DslError {
    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_reference_display() {
        let err = DslError::UnresolvedReference {
            token: "undeclared".to_string(),
            path: "services[0].image".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unresolved reference '${undeclared}' at services[0].image"
        );
    }

    #[test]
    fn test_cyclic_reference_display() {
        let err = DslError::CyclicReference {
            chain: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(err.to_string(), "Cyclic input reference: A -> B -> A");
    }

    #[test]
    fn test_input_collision_display() {
        let err = DslError::InputCollision {
            name: "PORT".to_string(),
        };
        assert!(err.to_string().contains("$PORT"));
    }
}
