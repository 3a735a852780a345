//! Error types for lineage operations.
//!
//! Building a graph never fails: malformed rules, unresolved names and
//! dangling endpoints are recorded as diagnostics on the result. The variants
//! here cover the few places that can genuinely fail: reading documents from
//! disk and querying a node the graph does not contain.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for lineage operations.
pub type Result<T> = std::result::Result<T, LineageError>;

#[derive(Debug, Error)]
pub enum LineageError {
    /// A query named a node id that is not in the graph.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A rule or catalog document could not be parsed.
    #[error("invalid document {}: {message}", path.display())]
    Document { path: PathBuf, message: String },

    /// Result serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration or arguments.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LineageError {
    pub(crate) fn document(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        LineageError::Document {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
