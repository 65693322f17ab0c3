//! In-memory source and sink doubles for pipeline tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Map, Value};

use cmsgraph_shared::{
    BranchRef, ByteStream, CmsGraphError, ContentSource, FileArtifact, LocalId, LocalNode,
    NodeSink, PageRequest, PageResult, RemoteDocument, Result,
};

/// Serves a fixed corpus in `skip`/`limit` windows and canned attachments.
#[derive(Default)]
pub struct StubSource {
    documents: Vec<RemoteDocument>,
    /// Chunks per `(doc_id, key)`; an `Err` chunk fails the stream there.
    attachments: HashMap<(String, String), Vec<std::result::Result<Vec<u8>, String>>>,
    downloads: Mutex<Vec<(String, String)>>,
    /// Page requests at or beyond this offset fail.
    fail_from_skip: Option<usize>,
    requests: Mutex<Vec<PageRequest>>,
}

impl StubSource {
    pub fn with_documents(mut self, documents: Vec<RemoteDocument>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_attachment(mut self, doc_id: &str, key: &str, chunks: &[&[u8]]) -> Self {
        self.attachments.insert(
            (doc_id.to_string(), key.to_string()),
            chunks.iter().map(|c| Ok(c.to_vec())).collect(),
        );
        self
    }

    /// An attachment whose stream yields `first` and then fails.
    pub fn with_broken_attachment(mut self, doc_id: &str, key: &str, first: &[u8]) -> Self {
        self.attachments.insert(
            (doc_id.to_string(), key.to_string()),
            vec![Ok(first.to_vec()), Err("connection reset mid-body".into())],
        );
        self
    }

    /// Every `(doc_id, key)` a download was opened for.
    pub fn downloads(&self) -> Vec<(String, String)> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn failing_from(mut self, skip: usize) -> Self {
        self.fail_from_skip = Some(skip);
        self
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentSource for StubSource {
    async fn query_nodes(
        &self,
        _branch: &BranchRef,
        _query: &Value,
        page: PageRequest,
    ) -> Result<PageResult> {
        self.requests.lock().unwrap().push(page);
        if self.fail_from_skip.is_some_and(|skip| page.skip >= skip) {
            return Err(CmsGraphError::Transport("connection reset".into()));
        }
        let rows: Vec<_> = self
            .documents
            .iter()
            .skip(page.skip)
            .take(page.limit)
            .cloned()
            .collect();
        Ok(PageResult {
            size: rows.len(),
            rows,
        })
    }

    async fn download_attachment(
        &self,
        _branch: &BranchRef,
        doc_id: &str,
        attachment_key: &str,
    ) -> Result<ByteStream> {
        self.downloads
            .lock()
            .unwrap()
            .push((doc_id.to_string(), attachment_key.to_string()));
        let chunks = self
            .attachments
            .get(&(doc_id.to_string(), attachment_key.to_string()))
            .cloned()
            .ok_or_else(|| {
                CmsGraphError::Transport(format!("{doc_id}/{attachment_key}: HTTP 404"))
            })?;
        let chunks = chunks.into_iter().map(|chunk| match chunk {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(message) => Err(CmsGraphError::Transport(message)),
        });
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn introspect_schema(&self, _branch: &BranchRef) -> Result<String> {
        Err(CmsGraphError::Transport("no schema".into()))
    }

    async fn execute_remote_query(
        &self,
        _branch: &BranchRef,
        _query_text: &str,
        _operation_name: Option<&str>,
        _variables: &Map<String, Value>,
    ) -> Result<Value> {
        Err(CmsGraphError::Transport("no graphql".into()))
    }
}

/// Records every sink call.
#[derive(Default)]
pub struct RecordingSink {
    nodes: Mutex<Vec<LocalNode>>,
    field_updates: Mutex<Vec<(LocalId, String, Value)>>,
    files: Mutex<Vec<FileArtifact>>,
    fail_registration: bool,
}

impl RecordingSink {
    pub fn failing_registration() -> Self {
        Self {
            fail_registration: true,
            ..Self::default()
        }
    }

    /// Id handed out for a materialized file.
    pub fn artifact_id(file_name: &str) -> LocalId {
        LocalId::mint(&format!("file-{file_name}"))
    }

    pub fn nodes(&self) -> Vec<LocalNode> {
        self.nodes.lock().unwrap().clone()
    }

    pub fn field_updates(&self) -> Vec<(LocalId, String, Value)> {
        self.field_updates.lock().unwrap().clone()
    }

    pub fn files(&self) -> Vec<FileArtifact> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeSink for RecordingSink {
    async fn register_node(&self, node: &LocalNode) -> Result<()> {
        if self.fail_registration {
            return Err(CmsGraphError::Storage("disk full".into()));
        }
        self.nodes.lock().unwrap().push(node.clone());
        Ok(())
    }

    async fn update_node_field(&self, node_id: &LocalId, field: &str, value: &Value) -> Result<()> {
        let registered = self.nodes.lock().unwrap().iter().any(|n| n.id == *node_id);
        if !registered {
            return Err(CmsGraphError::Storage(format!("node {node_id} is not registered")));
        }
        self.field_updates
            .lock()
            .unwrap()
            .push((*node_id, field.to_string(), value.clone()));
        Ok(())
    }

    async fn materialize_file(&self, file: FileArtifact) -> Result<LocalId> {
        let id = Self::artifact_id(&file.file_name());
        self.files.lock().unwrap().push(file);
        Ok(id)
    }

    async fn register_schema(&self, _name: &str, _sdl: &str) -> Result<()> {
        Ok(())
    }

    async fn record_dependency(&self, _path: &str, _node_id: &LocalId) -> Result<()> {
        Ok(())
    }
}
