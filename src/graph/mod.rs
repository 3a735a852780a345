//! Lineage graph module, the structural backbone of the crate.
//!
//! Provides the catalog and graph data model, the builder that reconciles
//! catalog evidence into nodes and edges, and the query engine over the result.

pub mod builder;
pub mod engine;
pub mod types;

pub use builder::build_graph;
pub use engine::{
    canonical_direction, BidirectionalPair, GraphStats, LineageGraph, PathResult, TraceResult,
};
pub use types::{
    edge_id, BuildResult, CatalogDocument, CatalogObject, Column, Edge, EdgeKind, Node, NodeKind,
    ObjectDiagnostics, ParseDiagnostics, RawDependency,
};
