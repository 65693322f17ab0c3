//! Execution bridge to the remote GraphQL endpoint.

use apollo_compiler::ast;
use serde_json::{Map, Value};
use tracing::debug;

use cmsgraph_shared::{BranchRef, ContentSource, Result};

/// Forwards GraphQL documents to one remote branch.
///
/// Every call is one round trip. Nothing is cached or retried.
pub struct QueryBridge<'a> {
    source: &'a dyn ContentSource,
    branch: BranchRef,
}

impl<'a> QueryBridge<'a> {
    pub fn new(source: &'a dyn ContentSource, branch: BranchRef) -> Self {
        Self { source, branch }
    }

    /// Serialize `document` and execute it remotely, returning the raw
    /// `{data, errors}` response.
    pub async fn execute(
        &self,
        document: &ast::Document,
        variables: &Map<String, Value>,
        operation_name: Option<&str>,
    ) -> Result<Value> {
        let query_text = document.to_string();
        debug!(branch = %self.branch, operation_name = ?operation_name, "forwarding query");
        self.source
            .execute_remote_query(&self.branch, &query_text, operation_name, variables)
            .await
    }
}
