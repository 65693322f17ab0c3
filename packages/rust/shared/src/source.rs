//! The remote content repository as seen by the pipelines.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::{BranchRef, PageRequest, PageResult};

/// Stream of attachment bytes, as delivered by the transport.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Read access to a remote content repository.
///
/// Every call is one remote round trip; implementations do not retry.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Query one page of documents on `branch` matching `query`.
    async fn query_nodes(
        &self,
        branch: &BranchRef,
        query: &Value,
        page: PageRequest,
    ) -> Result<PageResult>;

    /// Open a byte stream for attachment `attachment_key` of `doc_id`.
    async fn download_attachment(
        &self,
        branch: &BranchRef,
        doc_id: &str,
        attachment_key: &str,
    ) -> Result<ByteStream>;

    /// Fetch the branch's GraphQL schema as SDL text.
    async fn introspect_schema(&self, branch: &BranchRef) -> Result<String>;

    /// Execute a GraphQL document against the branch and return the raw
    /// response (`{"data": ..., "errors": ...}`).
    async fn execute_remote_query(
        &self,
        branch: &BranchRef,
        query_text: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
    ) -> Result<Value>;
}
