//! Core types for the lineage graph.
//!
//! Defines catalog inputs (what the metadata reader hands us), the node and
//! edge model of the finished graph, and the diagnostics gathered while
//! building it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{LineageError, Result};

/// The type of a schema object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Table,
    View,
    /// A stored procedure. The only kind whose body is mined for references.
    #[serde(alias = "proc", alias = "stored_procedure")]
    Procedure,
    Function,
}

impl NodeKind {
    /// Procedures and functions.
    pub fn is_routine(&self) -> bool {
        matches!(self, NodeKind::Procedure | NodeKind::Function)
    }

    /// Tables and views.
    pub fn is_data(&self) -> bool {
        matches!(self, NodeKind::Table | NodeKind::View)
    }

    /// Whether the body text goes through the reference extractor.
    pub fn is_body_parsed(&self) -> bool {
        matches!(self, NodeKind::Procedure)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Table => write!(f, "table"),
            NodeKind::View => write!(f, "view"),
            NodeKind::Procedure => write!(f, "procedure"),
            NodeKind::Function => write!(f, "function"),
        }
    }
}

/// The kind of an edge in the lineage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Data flows from source to target (read or write).
    Reference,
    /// Source routine invokes target routine.
    Call,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Reference => write!(f, "reference"),
            EdgeKind::Call => write!(f, "call"),
        }
    }
}

// ─── Catalog Input ──────────────────────────────────────────────

/// Column metadata attached to a catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// One schema object as supplied by the catalog reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogObject {
    /// Raw qualified name as the source spelled it.
    pub full_name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,
}

impl CatalogObject {
    pub fn new(full_name: &str, kind: NodeKind) -> Self {
        Self {
            full_name: full_name.to_string(),
            kind,
            body: None,
            columns: None,
        }
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// A structurally-declared reference: `source_name`'s definition refers to
/// `target_name`. Direction of data flow is decided by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDependency {
    pub source_name: String,
    pub target_name: String,
}

impl RawDependency {
    pub fn new(source_name: &str, target_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            target_name: target_name.to_string(),
        }
    }
}

/// The flat collections a catalog reader produces, as a JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub objects: Vec<CatalogObject>,
    #[serde(default)]
    pub dependencies: Vec<RawDependency>,
}

impl CatalogDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| LineageError::document(path, e))
    }
}

// ─── Graph Model ────────────────────────────────────────────────

/// A schema object in the finished graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Canonical lowercase id, e.g. `[dbo].[orders]`.
    pub id: String,
    /// Uppercased schema.
    pub schema: String,
    /// Object name in its original casing.
    pub name: String,
    /// The name exactly as the catalog spelled it.
    pub full_name: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// A directed dependency between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(source: &str, target: &str, kind: EdgeKind) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            kind,
        }
    }

    pub fn id(&self) -> String {
        edge_id(&self.source, &self.target)
    }
}

/// Render the id of the edge `source -> target`.
pub fn edge_id(source: &str, target: &str) -> String {
    format!("{}->{}", source, target)
}

// ─── Diagnostics ────────────────────────────────────────────────

/// Per-routine breakdown of what the extractor found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDiagnostics {
    /// Distinct nodes feeding into this routine.
    pub resolved_inbound: usize,
    /// Distinct nodes this routine writes to or calls.
    pub resolved_outbound: usize,
    /// Qualified names that matched no catalog object.
    pub unrelated: Vec<String>,
    /// Unqualified or system-schema names, never resolved.
    pub skipped: Vec<String>,
}

impl ObjectDiagnostics {
    pub fn resolved(&self) -> usize {
        self.resolved_inbound + self.resolved_outbound
    }
}

/// Totals for one build pass plus a per-routine breakdown keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostics {
    pub references_found: usize,
    pub references_resolved: usize,
    pub unresolved_references: Vec<String>,
    pub objects: BTreeMap<String, ObjectDiagnostics>,
}

/// Everything a build pass produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildResult {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub diagnostics: ParseDiagnostics,
    /// Non-fatal conditions such as an empty catalog.
    pub warnings: Vec<String>,
}

impl BuildResult {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source == source && e.target == target)
    }
}
