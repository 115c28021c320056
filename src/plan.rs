//! Execution plans
//!
//! A [`Plan`] is a resolved document together with its validated dependency
//! graph. Building one performs every structural check, so a run that has a
//! plan never fails on a document defect.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::dsl::{Document, DslError, Overrides};
use crate::graph::{DependencyGraph, GraphError};

/// A structural error that prevents any execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Resolution or decoding failed
    #[error(transparent)]
    Document(#[from] DslError),

    /// Graph validation failed
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// An immutable, validated document and graph
#[derive(Debug, Clone)]
pub struct Plan {
    document: Arc<Document>,
    graph: Arc<DependencyGraph>,
}

impl Plan {
    /// Resolves, decodes and validates a raw document
    ///
    /// # Errors
    ///
    /// Returns the first [`DslError`] or [`GraphError`] encountered.
    pub fn build(raw: &Value, overrides: &Overrides) -> Result<Self, PlanError> {
        let document = Document::load(raw, overrides)?;
        Self::from_document(document)
    }

    /// Validates an already decoded document
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] if the document's references are invalid.
    pub fn from_document(document: Document) -> Result<Self, PlanError> {
        let graph = DependencyGraph::build(&document)?;
        Ok(Self {
            document: Arc::new(document),
            graph: Arc::new(graph),
        })
    }

    /// The resolved document
    #[must_use]
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// The validated graph
    #[must_use]
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Text rendering of the plan with service commands for `runtime`
    #[must_use]
    pub fn render<'a>(&'a self, runtime: &'a str) -> Rendered<'a> {
        Rendered {
            plan: self,
            runtime,
        }
    }

    /// Writes services in start order, then tests
    fn write_to(&self, out: &mut impl fmt::Write, runtime: &str) -> fmt::Result {
        writeln!(out, "Services (start order):")?;
        for (position, name) in self.graph.service_order().into_iter().enumerate() {
            let Some(service) = self.document.service(name) else {
                continue;
            };
            writeln!(out, "  {}. {}", position + 1, service.name)?;
            let predecessors = self.graph.service_predecessors(name);
            if !predecessors.is_empty() {
                writeln!(out, "     after: {}", predecessors.join(", "))?;
            }
            writeln!(out, "     run:   {}", service.command_line(runtime))?;
        }

        writeln!(out, "Tests:")?;
        for test in &self.document.tests {
            writeln!(out, "  - {} [{}]", test.name, test.mode)?;
            let triggers = self.graph.test_triggers(&test.name);
            if triggers.is_empty() {
                writeln!(out, "     scheduled: at start")?;
            } else {
                writeln!(out, "     scheduled: when {} ready", triggers.join(" or "))?;
            }
            let needs = self.graph.test_needs(&test.name);
            if !needs.is_empty() {
                writeln!(out, "     needs: {}", needs.join(", "))?;
            }
            writeln!(out, "     run:   {}", test.command_line())?;
        }
        Ok(())
    }
}

/// A [`Plan`] displayed for a specific container runtime
#[derive(Debug, Clone, Copy)]
pub struct Rendered<'a> {
    plan: &'a Plan,
    runtime: &'a str,
}

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.plan.write_to(f, self.runtime)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f, "docker")
    }
}
