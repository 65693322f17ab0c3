//! The host content graph that normalized nodes are written into.

use std::path::{Component, Path};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::{CmsGraphError, Result};
use crate::types::{LocalId, LocalNode, content_digest};

/// A binary buffer to be stored as a file artifact owned by a node.
#[derive(Debug, Clone)]
pub struct FileArtifact {
    pub buffer: Bytes,
    /// Extension including the leading dot (e.g. `.png`).
    pub ext: String,
    /// Base name without extension.
    pub name: String,
    /// Node the artifact belongs to.
    pub owner_id: LocalId,
}

impl FileArtifact {
    /// Final file name, `name` + `ext`.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.ext)
    }

    /// [`file_name`](Self::file_name), rejected unless it is one plain path
    /// component.
    pub fn checked_file_name(&self) -> Result<String> {
        let file_name = self.file_name();
        if !is_plain_file_name(&file_name) {
            return Err(CmsGraphError::validation(format!(
                "unusable file name '{file_name}'"
            )));
        }
        Ok(file_name)
    }
}

/// Whether `file_name` can be joined onto a directory without leaving it:
/// a single normal component with no separators of either platform.
pub fn is_plain_file_name(file_name: &str) -> bool {
    if file_name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(file_name).components();
    matches!(components.next(), Some(Component::Normal(c)) if c == file_name)
        && components.next().is_none()
}

/// Write access to the host content graph.
///
/// Registration is an upsert: registering a node whose id already exists
/// replaces it. Callers order `register_node` before any
/// `update_node_field` for the same id.
#[async_trait]
pub trait NodeSink: Send + Sync {
    /// Mint a stable node id from `seed`.
    fn mint_id(&self, seed: &str) -> LocalId {
        LocalId::mint(seed)
    }

    /// Digest used for `internal.contentDigest`.
    fn content_digest(&self, content: &Value) -> String {
        content_digest(content)
    }

    async fn register_node(&self, node: &LocalNode) -> Result<()>;

    /// Set `field` on an already registered node.
    async fn update_node_field(&self, node_id: &LocalId, field: &str, value: &Value)
    -> Result<()>;

    /// Store `file` and return the id of the file node created for it.
    async fn materialize_file(&self, file: FileArtifact) -> Result<LocalId>;

    /// Register a schema (as SDL) under `name`.
    async fn register_schema(&self, name: &str, sdl: &str) -> Result<()>;

    /// Record that the page at `path` depends on node `node_id`.
    async fn record_dependency(&self, path: &str, node_id: &LocalId) -> Result<()>;
}
