//! Service/test dependency graph
//!
//! Nodes are the document's services and tests. Every edge points from the
//! node that must happen first to the node that waits on it:
//!
//! | Field                 | Edge                 |
//! |-----------------------|----------------------|
//! | `A.depends_on: [B]`   | `B -> A`             |
//! | `A.next: [B]`         | `A -> B`             |
//! | `S.trigger: [T]`      | `S -> T` (schedule)  |
//! | `T.needs: [S]`        | `S -> T`             |
//!
//! `trigger` edges only schedule tests. They are left out of cycle detection
//! and topological ordering.

pub mod errors;

pub use errors::GraphError;

use ahash::AHashMap;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use crate::dsl::Document;

/// Kind of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A service
    Service,
    /// A test
    Test,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Relationship carried by an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Target starts only after the source is ready
    DependsOn,
    /// Source releases the target once ready
    Next,
    /// Source schedules the target test once ready
    Trigger,
    /// Target test requires the source service
    Needs,
}

impl EdgeKind {
    /// Field name used in documents
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependsOn => "depends_on",
            Self::Next => "next",
            Self::Trigger => "trigger",
            Self::Needs => "needs",
        }
    }

    /// Whether the edge constrains execution order
    #[must_use]
    pub fn is_ordering(&self) -> bool {
        !matches!(self, Self::Trigger)
    }

    /// Kind of node a reference in this field must name
    #[must_use]
    pub fn target_kind(&self) -> NodeKind {
        match self {
            Self::Trigger => NodeKind::Test,
            Self::DependsOn | Self::Next | Self::Needs => NodeKind::Service,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A graph node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Service or test name
    pub name: String,
    /// Node kind
    pub kind: NodeKind,
}

/// A directed edge between two nodes, by node id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Node that happens first
    pub from: usize,
    /// Node that waits on `from`
    pub to: usize,
    /// Relationship
    pub kind: EdgeKind,
}

/// Validated, immutable dependency graph
///
/// Node ids follow declaration order: services first, then tests. Ties in
/// topological ordering are broken by node id.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: AHashMap<String, usize>,
    edges: Vec<Edge>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Builds and validates the graph of a resolved document
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`], [`GraphError::UnknownReference`]
    /// or [`GraphError::CyclicDependency`].
    pub fn build(document: &Document) -> Result<Self, GraphError> {
        let mut graph = Self::default();

        for service in &document.services {
            graph.add_node(&service.name, NodeKind::Service)?;
        }
        for test in &document.tests {
            graph.add_node(&test.name, NodeKind::Test)?;
        }

        for service in &document.services {
            for target in &service.depends_on {
                graph.connect_reference(
                    target,
                    &service.name,
                    &service.name,
                    target,
                    EdgeKind::DependsOn,
                )?;
            }
            for target in &service.next {
                graph.connect_reference(
                    &service.name,
                    target,
                    &service.name,
                    target,
                    EdgeKind::Next,
                )?;
            }
            for target in &service.trigger {
                graph.connect_reference(
                    &service.name,
                    target,
                    &service.name,
                    target,
                    EdgeKind::Trigger,
                )?;
            }
        }
        for test in &document.tests {
            for target in &test.needs {
                graph.connect_reference(
                    target,
                    &test.name,
                    &test.name,
                    target,
                    EdgeKind::Needs,
                )?;
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::CyclicDependency { cycle });
        }
        graph.order = graph.topological_ids();

        tracing::debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Built dependency graph"
        );
        Ok(graph)
    }

    fn add_node(&mut self, name: &str, kind: NodeKind) -> Result<(), GraphError> {
        if self.index.contains_key(name) {
            return Err(GraphError::DuplicateNode {
                name: name.to_string(),
            });
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
        });
        self.index.insert(name.to_string(), id);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        Ok(())
    }

    /// Adds `from -> to` after checking that `target` names a node of the
    /// kind `edge` expects. `declared_by` is the node whose field holds it.
    fn connect_reference(
        &mut self,
        from: &str,
        to: &str,
        declared_by: &str,
        target: &str,
        edge: EdgeKind,
    ) -> Result<(), GraphError> {
        let unknown = || GraphError::UnknownReference {
            node: declared_by.to_string(),
            edge,
            target: target.to_string(),
        };
        let target_id = *self.index.get(target).ok_or_else(unknown)?;
        if self.nodes[target_id].kind != edge.target_kind() {
            return Err(unknown());
        }

        let (Some(&from), Some(&to)) = (self.index.get(from), self.index.get(to)) else {
            return Err(unknown());
        };
        let id = self.edges.len();
        self.edges.push(Edge { from, to, kind: edge });
        self.outgoing[from].push(id);
        self.incoming[to].push(id);
        Ok(())
    }

    /// Depth-first search over ordering edges; returns the first cycle found
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack: Vec<usize> = Vec::new();

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // (node, next outgoing edge position)
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::OnStack;
            stack.push(root);

            while let Some(frame) = frames.last_mut() {
                let (node, position) = *frame;
                let Some(&edge_id) = self.outgoing[node].get(position) else {
                    marks[node] = Mark::Done;
                    stack.pop();
                    frames.pop();
                    continue;
                };
                frame.1 += 1;

                let edge = self.edges[edge_id];
                if !edge.kind.is_ordering() {
                    continue;
                }
                match marks[edge.to] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|&n| n == edge.to).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[start..]
                            .iter()
                            .map(|&n| self.nodes[n].name.clone())
                            .collect();
                        cycle.push(self.nodes[edge.to].name.clone());
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        marks[edge.to] = Mark::OnStack;
                        stack.push(edge.to);
                        frames.push((edge.to, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }

    /// Kahn's algorithm over ordering edges, lowest id first among ready nodes
    fn topological_ids(&self) -> Vec<usize> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for edge in self.edges.iter().filter(|e| e.kind.is_ordering()) {
            in_degree[edge.to] += 1;
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(id, _)| Reverse(id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for &edge_id in &self.outgoing[id] {
                let edge = self.edges[edge_id];
                if !edge.kind.is_ordering() {
                    continue;
                }
                in_degree[edge.to] -= 1;
                if in_degree[edge.to] == 0 {
                    ready.push(Reverse(edge.to));
                }
            }
        }
        order
    }

    fn id(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn neighbours(&self, name: &str, inbound: bool, kinds: &[EdgeKind]) -> Vec<&str> {
        let Some(id) = self.id(name) else {
            return Vec::new();
        };
        let edge_ids = if inbound {
            &self.incoming[id]
        } else {
            &self.outgoing[id]
        };
        let mut names: Vec<&str> = Vec::with_capacity(edge_ids.len());
        for &edge_id in edge_ids {
            let edge = self.edges[edge_id];
            if !kinds.contains(&edge.kind) {
                continue;
            }
            let other = if inbound { edge.from } else { edge.to };
            let name = self.nodes[other].name.as_str();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// All nodes, services first, in declaration order
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges, in declaration order
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Node by id
    #[must_use]
    pub fn node(&self, id: usize) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Kind of the named node
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<NodeKind> {
        self.id(name).map(|id| self.nodes[id].kind)
    }

    /// Service names in declaration order
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Service)
            .map(|n| n.name.as_str())
    }

    /// Test names in declaration order
    pub fn tests(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Test)
            .map(|n| n.name.as_str())
    }

    /// All nodes in topological order
    pub fn topological_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|&id| self.nodes[id].name.as_str())
    }

    /// Services in topological order, ties broken by declaration order
    #[must_use]
    pub fn service_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|&&id| self.nodes[id].kind == NodeKind::Service)
            .map(|&id| self.nodes[id].name.as_str())
            .collect()
    }

    /// Services that must be ready before `service` starts
    ///
    /// The union of its `depends_on` list and every service naming it in
    /// `next`.
    #[must_use]
    pub fn service_predecessors(&self, service: &str) -> Vec<&str> {
        self.neighbours(service, true, &[EdgeKind::DependsOn, EdgeKind::Next])
    }

    /// Services waiting on `service`
    #[must_use]
    pub fn service_successors(&self, service: &str) -> Vec<&str> {
        self.neighbours(service, false, &[EdgeKind::DependsOn, EdgeKind::Next])
    }

    /// Tests scheduled once `service` is ready
    #[must_use]
    pub fn triggered_tests(&self, service: &str) -> Vec<&str> {
        self.neighbours(service, false, &[EdgeKind::Trigger])
    }

    /// Services whose readiness schedules `test`
    #[must_use]
    pub fn test_triggers(&self, test: &str) -> Vec<&str> {
        self.neighbours(test, true, &[EdgeKind::Trigger])
    }

    /// Services `test` needs
    #[must_use]
    pub fn test_needs(&self, test: &str) -> Vec<&str> {
        self.neighbours(test, true, &[EdgeKind::Needs])
    }

    /// Tests that need `service`
    #[must_use]
    pub fn needing_tests(&self, service: &str) -> Vec<&str> {
        self.neighbours(service, false, &[EdgeKind::Needs])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Overrides;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn service(name: &str, depends_on: &[&str], next: &[&str], trigger: &[&str]) -> Value {
        json!({
            "name": name,
            "image": "img",
            "depends_on": depends_on,
            "next": next,
            "trigger": trigger,
        })
    }

    fn test(name: &str, needs: &[&str]) -> Value {
        json!({
            "name": name,
            "mode": "shell",
            "needs": needs,
            "runner": { "cmd": ["true"] },
        })
    }

    fn build(services: Vec<Value>, tests: Vec<Value>) -> Result<DependencyGraph, GraphError> {
        let raw = json!({ "services": services, "tests": tests });
        let document = Document::load(&raw, &Overrides::new()).unwrap();
        DependencyGraph::build(&document)
    }

    #[test]
    fn test_depends_on_orders_services() {
        let graph = build(
            vec![service("A", &["B"], &[], &[]), service("B", &[], &[], &[])],
            vec![],
        )
        .unwrap();
        assert_eq!(graph.service_order(), vec!["B", "A"]);
        assert_eq!(graph.service_predecessors("A"), vec!["B"]);
        assert_eq!(graph.service_successors("B"), vec!["A"]);
    }

    #[test]
    fn test_next_is_a_predecessor_edge() {
        let graph = build(
            vec![service("A", &[], &["B"], &[]), service("B", &[], &[], &[])],
            vec![],
        )
        .unwrap();
        assert_eq!(graph.service_predecessors("B"), vec!["A"]);
        assert_eq!(graph.service_order(), vec!["A", "B"]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let graph = build(
            vec![
                service("C", &[], &[], &[]),
                service("A", &[], &[], &[]),
                service("B", &[], &[], &[]),
            ],
            vec![],
        )
        .unwrap();
        assert_eq!(graph.service_order(), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_trigger_and_needs_queries() {
        let graph = build(
            vec![
                service("db", &[], &[], &["t1"]),
                service("web", &["db"], &[], &["t1", "t2"]),
            ],
            vec![test("t1", &["web"]), test("t2", &[])],
        )
        .unwrap();

        assert_eq!(graph.triggered_tests("web"), vec!["t1", "t2"]);
        assert_eq!(graph.test_triggers("t1"), vec!["db", "web"]);
        assert_eq!(graph.test_needs("t1"), vec!["web"]);
        assert_eq!(graph.needing_tests("web"), vec!["t1"]);
        assert!(graph.test_needs("t2").is_empty());
        assert_eq!(graph.kind("t2"), Some(NodeKind::Test));
    }

    #[test]
    fn test_unknown_depends_on_target() {
        let err = build(vec![service("A", &["missing"], &[], &[])], vec![]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownReference {
                node: "A".to_string(),
                edge: EdgeKind::DependsOn,
                target: "missing".to_string(),
            }
        );
    }

    #[test]
    fn test_trigger_must_name_a_test() {
        let err = build(
            vec![service("A", &[], &[], &["B"]), service("B", &[], &[], &[])],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnknownReference { edge: EdgeKind::Trigger, ref target, .. } if target == "B"
        ));
    }

    #[test]
    fn test_needs_must_name_a_service() {
        let err = build(vec![], vec![test("t1", &["t2"]), test("t2", &[])]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnknownReference { edge: EdgeKind::Needs, ref node, .. } if node == "t1"
        ));
    }

    #[test]
    fn test_duplicate_names_across_kinds() {
        let err = build(vec![service("x", &[], &[], &[])], vec![test("x", &[])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateNode {
                name: "x".to_string()
            }
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = build(vec![service("A", &["A"], &[], &[])], vec![]).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                cycle: vec!["A".to_string(), "A".to_string()],
            }
        );
    }

    #[test]
    fn test_shared_dependency_is_not_a_cycle() {
        let graph = build(
            vec![
                service("A", &["B"], &[], &[]),
                service("B", &[], &[], &[]),
                service("C", &[], &["B"], &[]),
            ],
            vec![],
        )
        .unwrap();
        assert_eq!(graph.service_order(), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_cycle_through_mixed_edges() {
        // B -> A (depends_on), A -> C (next), C -> B (next)
        let err = build(
            vec![
                service("A", &["B"], &["C"], &[]),
                service("B", &[], &[], &[]),
                service("C", &[], &["B"], &[]),
            ],
            vec![],
        )
        .unwrap_err();
        let GraphError::CyclicDependency { cycle } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&"A".to_string()));
    }

    #[test]
    fn test_trigger_edges_do_not_form_cycles() {
        let graph = build(
            vec![service("S", &[], &[], &["T"])],
            vec![test("T", &["S"])],
        );
        assert!(graph.is_ok());
    }

    proptest! {
        #[test]
        fn prop_acyclic_graphs_order_predecessors_first(
            deps in proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..3), 1..8)
        ) {
            // Service i may only depend on services with a lower index.
            let names: Vec<String> = (0..deps.len()).map(|i| format!("s{i}")).collect();
            let services: Vec<Value> = deps
                .iter()
                .enumerate()
                .map(|(i, picks)| {
                    let depends_on: Vec<&str> = if i == 0 {
                        Vec::new()
                    } else {
                        picks.iter().map(|p| names[p.index(i)].as_str()).collect()
                    };
                    service(&names[i], &depends_on, &[], &[])
                })
                .collect();

            let graph = build(services, vec![]).unwrap();
            let order = graph.service_order();
            prop_assert_eq!(order.len(), names.len());
            for name in &names {
                let position = order.iter().position(|n| n == name).unwrap();
                for pred in graph.service_predecessors(name) {
                    let pred_position = order.iter().position(|n| *n == pred).unwrap();
                    prop_assert!(pred_position < position);
                }
            }
        }

        #[test]
        fn prop_back_edge_is_reported_as_cycle(len in 2usize..6) {
            // s0 <- s1 <- ... <- s(len-1), plus s0 depending on the last one.
            let names: Vec<String> = (0..len).map(|i| format!("s{i}")).collect();
            let services: Vec<Value> = (0..len)
                .map(|i| {
                    let dep = if i == 0 { &names[len - 1] } else { &names[i - 1] };
                    service(&names[i], &[dep.as_str()], &[], &[])
                })
                .collect();

            let err = build(services, vec![]).unwrap_err();
            let is_cycle = matches!(err, GraphError::CyclicDependency { ref cycle } if cycle.len() == len + 1);
            prop_assert!(is_cycle);
        }
    }
}
