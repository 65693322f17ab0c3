//! Remote and sink doubles for schema tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use cmsgraph_shared::{
    BranchRef, ByteStream, CmsGraphError, ContentSource, FileArtifact, LocalId, LocalNode,
    NodeSink, PageRequest, PageResult, Result,
};

#[derive(Debug, Clone)]
pub struct RemoteCall {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Map<String, Value>,
}

/// Serves fixed SDL and answers every remote query with one canned response.
pub struct StubRemote {
    sdl: String,
    response: Value,
    failing: bool,
    calls: Mutex<Vec<RemoteCall>>,
}

impl StubRemote {
    pub fn new(sdl: &str) -> Self {
        Self {
            sdl: sdl.to_string(),
            response: json!({"data": null}),
            failing: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond_with(mut self, response: Value) -> Self {
        self.response = response;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentSource for StubRemote {
    async fn query_nodes(
        &self,
        _branch: &BranchRef,
        _query: &Value,
        _page: PageRequest,
    ) -> Result<PageResult> {
        Ok(PageResult {
            rows: Vec::new(),
            size: 0,
        })
    }

    async fn download_attachment(
        &self,
        _branch: &BranchRef,
        doc_id: &str,
        attachment_key: &str,
    ) -> Result<ByteStream> {
        Err(CmsGraphError::Transport(format!(
            "no attachment {attachment_key} on {doc_id}"
        )))
    }

    async fn introspect_schema(&self, _branch: &BranchRef) -> Result<String> {
        Ok(self.sdl.clone())
    }

    async fn execute_remote_query(
        &self,
        _branch: &BranchRef,
        query_text: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
    ) -> Result<Value> {
        if self.failing {
            return Err(CmsGraphError::Transport("HTTP 502".into()));
        }
        self.calls.lock().unwrap().push(RemoteCall {
            query: query_text.to_string(),
            operation_name: operation_name.map(str::to_string),
            variables: variables.clone(),
        });
        Ok(self.response.clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    nodes: Mutex<Vec<LocalNode>>,
    schemas: Mutex<Vec<(String, String)>>,
    dependencies: Mutex<Vec<(String, LocalId)>>,
}

impl RecordingSink {
    pub fn nodes(&self) -> Vec<LocalNode> {
        self.nodes.lock().unwrap().clone()
    }

    pub fn schemas(&self) -> Vec<(String, String)> {
        self.schemas.lock().unwrap().clone()
    }

    pub fn dependencies(&self) -> Vec<(String, LocalId)> {
        self.dependencies.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeSink for RecordingSink {
    async fn register_node(&self, node: &LocalNode) -> Result<()> {
        self.nodes.lock().unwrap().push(node.clone());
        Ok(())
    }

    async fn update_node_field(&self, node_id: &LocalId, field: &str, _value: &Value) -> Result<()> {
        Err(CmsGraphError::Storage(format!(
            "unexpected update of {field} on {node_id}"
        )))
    }

    async fn materialize_file(&self, file: FileArtifact) -> Result<LocalId> {
        Err(CmsGraphError::Storage(format!(
            "unexpected file {}",
            file.file_name()
        )))
    }

    async fn register_schema(&self, name: &str, sdl: &str) -> Result<()> {
        self.schemas
            .lock()
            .unwrap()
            .push((name.to_string(), sdl.to_string()));
        Ok(())
    }

    async fn record_dependency(&self, path: &str, node_id: &LocalId) -> Result<()> {
        self.dependencies
            .lock()
            .unwrap()
            .push((path.to_string(), *node_id));
        Ok(())
    }
}
