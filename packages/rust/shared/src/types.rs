//! Core domain types for cmsgraph: remote documents as they arrive and
//! local nodes as they are handed to the sink.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Page size used by the pagination driver.
pub const PAGE_SIZE: usize = 500;

/// Suffix marking a field as a foreign-key edge to another local node.
pub const FOREIGN_KEY_SUFFIX: &str = "___NODE";

/// Namespace for UUID v5 node ids. Changing it re-keys every stored node.
const NODE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c0f_2a1e_93b4_5d27_8e61_4f0a_c3d9_b725);

// ---------------------------------------------------------------------------
// LocalId
// ---------------------------------------------------------------------------

/// Identifier of a node in the local content graph.
///
/// Minted as a UUID v5 over a seed string, so the same seed always yields the
/// same id and re-ingesting a document upserts the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub Uuid);

impl LocalId {
    /// Deterministically mint an id from `seed`.
    pub fn mint(seed: &str) -> Self {
        Self(Uuid::new_v5(&NODE_ID_NAMESPACE, seed.as_bytes()))
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<LocalId> for Value {
    fn from(id: LocalId) -> Self {
        Value::String(id.to_string())
    }
}

/// SHA-256 hex digest of a JSON value's serialized form.
///
/// `serde_json::Map` keeps keys sorted, so equal content always serializes
/// (and therefore digests) identically.
pub fn content_digest(content: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// BranchRef
// ---------------------------------------------------------------------------

/// Repository + branch pair addressing a remote content branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    pub repository_id: String,
    pub branch_id: String,
}

impl BranchRef {
    pub fn new(repository_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            branch_id: branch_id.into(),
        }
    }
}

impl std::fmt::Display for BranchRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.repository_id, self.branch_id)
    }
}

// ---------------------------------------------------------------------------
// RemoteDocument
// ---------------------------------------------------------------------------

/// A document as returned by the remote repository.
///
/// Only `_doc` and `_type` have fixed meaning; everything else is arbitrary
/// nested JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteDocument(pub Map<String, Value>);

impl RemoteDocument {
    /// Remote document id (`_doc`), if present and a string.
    pub fn doc_id(&self) -> Option<&str> {
        self.0.get("_doc").and_then(Value::as_str)
    }

    /// Remote type name (`_type`), if present and a string.
    pub fn type_name(&self) -> Option<&str> {
        self.0.get("_type").and_then(Value::as_str)
    }

    /// Label used in logs and failure reports.
    pub fn label(&self) -> String {
        self.doc_id().unwrap_or("<unknown>").to_string()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for RemoteDocument {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

// ---------------------------------------------------------------------------
// AttachmentDescriptor
// ---------------------------------------------------------------------------

/// One entry of a document's `_system.attachments` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    /// Original upload filename, possibly with one or more extensions.
    pub filename: String,
    /// Extension the remote assigned to the stored binary (no leading dot).
    pub ext: String,
    /// Edge to the materialized file artifact, once fetched.
    #[serde(
        rename = "path___NODE",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub path: Option<LocalId>,
    /// Remaining remote metadata (mimetype, length, object id, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

/// Window parameters for a single page query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: usize,
    pub skip: usize,
    /// Ask the remote to include `_system` metadata in each row.
    pub metadata: bool,
}

impl PageRequest {
    pub fn at(skip: usize) -> Self {
        Self {
            limit: PAGE_SIZE,
            skip,
            metadata: true,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    #[serde(default)]
    pub rows: Vec<RemoteDocument>,
    #[serde(default)]
    pub size: usize,
}

// ---------------------------------------------------------------------------
// LocalNode
// ---------------------------------------------------------------------------

/// Host bookkeeping attached to every local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInternal {
    /// Node type name as exposed to graph consumers.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Serialized document content.
    pub content: String,
    /// Digest of `content`, used by the sink to skip unchanged upserts.
    #[serde(rename = "contentDigest")]
    pub content_digest: String,
}

/// A normalized, reference-resolved document ready for registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalNode {
    pub id: LocalId,
    #[serde(default)]
    pub parent: Option<LocalId>,
    #[serde(default)]
    pub children: Vec<LocalId>,
    pub internal: NodeInternal,
    /// Document fields after normalization and reference resolution.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LocalNode {
    /// Build a root-level node (no parent, no children) from resolved fields.
    pub fn new(id: LocalId, node_type: impl Into<String>, fields: Map<String, Value>) -> Self {
        let content = Value::Object(fields.clone());
        Self {
            id,
            parent: None,
            children: Vec::new(),
            internal: NodeInternal {
                node_type: node_type.into(),
                content: content.to_string(),
                content_digest: content_digest(&content),
            },
            fields,
        }
    }

    /// Attach this node to a parent (used for file artifacts).
    pub fn with_parent(mut self, parent: LocalId) -> Self {
        self.parent = Some(parent);
        self
    }
}
