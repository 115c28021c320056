//! Error types for graph construction

use thiserror::Error;

use super::EdgeKind;

/// Errors raised while building or validating the dependency graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An edge names a node that does not exist, or a node of the wrong kind
    #[error("'{node}' lists '{target}' in {edge}, but no such {expected} is declared", expected = .edge.target_kind())]
    UnknownReference {
        /// Node declaring the edge.
        node: String,
        /// Field the reference appears in.
        edge: EdgeKind,
        /// The missing name.
        target: String,
    },

    /// Ordering edges form a loop
    #[error("Dependency cycle: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Nodes along the cycle, first node repeated at the end.
        cycle: Vec<String>,
    },

    /// A name is used by more than one service or test
    #[error("Duplicate node name '{name}'")]
    DuplicateNode {
        /// The repeated name.
        name: String,
    },
}
