//! Error types for cmsgraph.
//!
//! Library crates use [`CmsGraphError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all cmsgraph operations.
#[derive(Debug, thiserror::Error)]
pub enum CmsGraphError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A remote call (page query, attachment download, schema
    /// introspection, remote query execution) failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A remote document cannot be normalized or resolved.
    #[error("malformed document {doc_id}: {message}")]
    MalformedDocument { doc_id: String, message: String },

    /// The remote schema cannot be turned into a namespaced query schema.
    #[error("schema shape error: {message}")]
    SchemaShape { message: String },

    /// A request against the namespaced schema was rejected.
    #[error("query error: {message}")]
    Query { message: String },

    /// Node store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A value taken from a document cannot be used as given (e.g. an
    /// attachment name that is not a plain file name).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CmsGraphError>;

impl CmsGraphError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a malformed-document error for the given remote id.
    pub fn malformed(doc_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedDocument {
            doc_id: doc_id.into(),
            message: msg.into(),
        }
    }

    /// Create a schema shape error from any displayable message.
    pub fn schema_shape(msg: impl Into<String>) -> Self {
        Self::SchemaShape {
            message: msg.into(),
        }
    }

    /// Create a query error from any displayable message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error only invalidates the document (or attachment) it
    /// was raised for, leaving the rest of an ingestion run intact.
    pub fn is_document_scoped(&self) -> bool {
        matches!(
            self,
            Self::MalformedDocument { .. } | Self::Transport(_) | Self::Validation { .. }
        )
    }
}
