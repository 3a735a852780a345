//! # Lineage
//!
//! Schema lineage graphs from catalog metadata.
//!
//! Given a flat catalog of schema objects (tables, views, procedures,
//! functions) and the dependencies a metadata reader declared between them,
//! this crate mines procedure bodies for read, write and call references,
//! reconciles both kinds of evidence into one directed graph, and answers
//! structural questions about it.
//!
//! ## Key Features
//!
//! - **Rule-driven extraction**: patterns are data, validated at load time
//! - **Direction inference**: reads flow into a routine, writes and calls flow out
//! - **Bounded tracing**: upstream/downstream lineage without sibling noise
//! - **Topology analytics**: islands, hubs, orphans, longest chains, cycles
//!
//! ## Quick Start
//!
//! ```rust
//! use lineage::{build_graph, CatalogObject, LineageGraph, NodeKind, RuleSet};
//!
//! let objects = vec![
//!     CatalogObject::new("dbo.Orders", NodeKind::Table),
//!     CatalogObject::new("sales.GetOrders", NodeKind::Procedure)
//!         .with_body("SELECT * FROM dbo.Orders"),
//! ];
//! let result = build_graph(&objects, &[], &RuleSet::default());
//! let graph = LineageGraph::from_build(&result);
//!
//! let trace = graph.trace("sales.GetOrders", 2, 2, true).unwrap();
//! assert_eq!(trace.node_ids.len(), 2);
//! ```

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod graph;
pub mod name;

// Re-exports for convenience
pub use error::{LineageError, Result};

// Graph re-exports
pub use graph::{
    build_graph, BuildResult, CatalogDocument, CatalogObject, Edge, EdgeKind, GraphStats,
    LineageGraph, Node, NodeKind, ParseDiagnostics, PathResult, RawDependency, TraceResult,
};

// Extraction
pub use extract::{extract_references, ExtractedRefs, RuleDef, RuleSet};

// Analysis
pub use analysis::{analyze, AnalysisConfig, AnalysisKind, AnalysisResult};

// Configuration
pub use config::LineageConfig;

pub use name::normalize;
