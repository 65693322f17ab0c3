//! HTTP client for the Cloud CMS content API.
//!
//! [`CloudCmsClient`] is an explicit session handle: open it with
//! [`CloudCmsClient::connect`] at the start of a run, pass it by reference to
//! the pipelines (it implements [`ContentSource`]), and [`close`] it at the
//! end. There is no process-wide session.
//!
//! [`close`]: CloudCmsClient::close

mod auth;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};
use url::Url;

use cmsgraph_shared::{
    BranchRef, ByteStream, CmsGraphError, ContentSource, Credentials, PageRequest, PageResult,
    Result,
};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("cmsgraph/", env!("CARGO_PKG_VERSION"));

/// An authenticated session against one Cloud CMS tenant.
pub struct CloudCmsClient {
    client: Client,
    base_url: Url,
    access_token: String,
}

impl std::fmt::Debug for CloudCmsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCmsClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl CloudCmsClient {
    /// Authenticate with `creds` and open a session.
    #[instrument(skip_all, fields(base_url = %creds.base_url))]
    pub async fn connect(creds: &Credentials) -> Result<Self> {
        let base_url = Url::parse(&creds.base_url).map_err(|e| {
            CmsGraphError::config(format!("invalid base_url '{}': {e}", creds.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CmsGraphError::Transport(format!("failed to build HTTP client: {e}")))?;

        let token = auth::password_grant(&client, &base_url, creds).await?;
        info!(expires_in = ?token.expires_in, "connected");

        Ok(Self {
            client,
            base_url,
            access_token: token.access_token,
        })
    }

    /// End the session. The access token is dropped with the handle.
    pub fn close(self) {
        info!(base_url = %self.base_url, "session closed");
    }

    /// Build an API URL from path segments, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CmsGraphError::config(format!("base_url cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn branch_endpoint(&self, branch: &BranchRef, rest: &[&str]) -> Result<Url> {
        let mut segments = vec![
            "repositories",
            branch.repository_id.as_str(),
            "branches",
            branch.branch_id.as_str(),
        ];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.access_token)
    }
}

/// Send a request and turn transport failures and non-2xx statuses into
/// [`CmsGraphError::Transport`].
async fn send(request: RequestBuilder, url: &Url) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| CmsGraphError::Transport(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CmsGraphError::Transport(format!("{url}: HTTP {status}")));
    }
    Ok(response)
}

#[async_trait]
impl ContentSource for CloudCmsClient {
    #[instrument(skip_all, fields(branch = %branch, skip = page.skip, limit = page.limit))]
    async fn query_nodes(
        &self,
        branch: &BranchRef,
        query: &Value,
        page: PageRequest,
    ) -> Result<PageResult> {
        let url = self.branch_endpoint(branch, &["nodes", "query"])?;
        let request = self
            .authorized(self.client.post(url.as_str()))
            .query(&[
                ("limit", page.limit.to_string()),
                ("skip", page.skip.to_string()),
                ("metadata", page.metadata.to_string()),
            ])
            .json(query);

        let result: PageResult = send(request, &url)
            .await?
            .json()
            .await
            .map_err(|e| CmsGraphError::Transport(format!("{url}: invalid page body: {e}")))?;

        debug!(size = result.size, rows = result.rows.len(), "page received");
        Ok(result)
    }

    #[instrument(skip_all, fields(branch = %branch, doc_id = %doc_id, attachment_key = %attachment_key))]
    async fn download_attachment(
        &self,
        branch: &BranchRef,
        doc_id: &str,
        attachment_key: &str,
    ) -> Result<ByteStream> {
        let url = self.branch_endpoint(branch, &["nodes", doc_id, "attachments", attachment_key])?;
        let request = self.authorized(self.client.get(url.as_str()));
        let response = send(request, &url).await?;

        let stream = response
            .bytes_stream()
            .map_err(move |e| CmsGraphError::Transport(format!("{url}: body read failed: {e}")))
            .boxed();
        Ok(stream)
    }

    #[instrument(skip_all, fields(branch = %branch))]
    async fn introspect_schema(&self, branch: &BranchRef) -> Result<String> {
        let url = self.branch_endpoint(branch, &["graphql", "schema"])?;
        let request = self.authorized(self.client.get(url.as_str()));

        send(request, &url)
            .await?
            .text()
            .await
            .map_err(|e| CmsGraphError::Transport(format!("{url}: body read failed: {e}")))
    }

    #[instrument(skip_all, fields(branch = %branch, operation_name = ?operation_name))]
    async fn execute_remote_query(
        &self,
        branch: &BranchRef,
        query_text: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
    ) -> Result<Value> {
        let url = self.branch_endpoint(branch, &["graphql"])?;
        let body = json!({
            "query": query_text,
            "operationName": operation_name,
            "variables": variables,
        });
        let request = self.authorized(self.client.post(url.as_str())).json(&body);

        send(request, &url)
            .await?
            .json()
            .await
            .map_err(|e| CmsGraphError::Transport(format!("{url}: invalid GraphQL response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds(server: &MockServer) -> Credentials {
        serde_json::from_value(json!({
            "clientKey": "ck",
            "clientSecret": "cs",
            "username": "reader",
            "password": "secret",
            "baseURL": server.uri(),
        }))
        .unwrap()
    }

    async fn connected(server: &MockServer) -> CloudCmsClient {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-123",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .mount(server)
            .await;

        CloudCmsClient::connect(&creds(server)).await.expect("connect")
    }

    fn branch() -> BranchRef {
        BranchRef::new("repo1", "master")
    }

    #[tokio::test]
    async fn connect_fails_on_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = CloudCmsClient::connect(&creds(&server)).await.unwrap_err();
        assert!(matches!(err, CmsGraphError::Transport(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn query_nodes_sends_window_and_query() {
        let server = MockServer::start().await;
        let client = connected(&server).await;

        Mock::given(method("POST"))
            .and(path("/repositories/repo1/branches/master/nodes/query"))
            .and(query_param("limit", "500"))
            .and(query_param("skip", "1000"))
            .and(query_param("metadata", "true"))
            .and(header("authorization", "Bearer tok-123"))
            .and(body_json(json!({"_type": "my:article"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rows": [{"_doc": "a", "_type": "my:article"}],
                "size": 1,
                "total_rows": 1001,
                "offset": 1000
            })))
            .mount(&server)
            .await;

        let page = client
            .query_nodes(&branch(), &json!({"_type": "my:article"}), PageRequest::at(1000))
            .await
            .expect("query nodes");

        assert_eq!(page.size, 1);
        assert_eq!(page.rows[0].doc_id(), Some("a"));
        client.close();
    }

    #[tokio::test]
    async fn download_attachment_streams_body() {
        let server = MockServer::start().await;
        let client = connected(&server).await;

        Mock::given(method("GET"))
            .and(path("/repositories/repo1/branches/master/nodes/doc1/attachments/default"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"binary-bytes".to_vec()))
            .mount(&server)
            .await;

        let stream = client
            .download_attachment(&branch(), "doc1", "default")
            .await
            .expect("open stream");
        let chunks: Vec<bytes::Bytes> = stream.try_collect().await.expect("drain");
        let body: Vec<u8> = chunks.concat();
        assert_eq!(body, b"binary-bytes");
    }

    #[tokio::test]
    async fn missing_attachment_is_transport_error() {
        let server = MockServer::start().await;
        let client = connected(&server).await;

        Mock::given(method("GET"))
            .and(path("/repositories/repo1/branches/master/nodes/doc1/attachments/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client
            .download_attachment(&branch(), "doc1", "gone")
            .await
            .err()
            .expect("404 must fail");
        assert!(matches!(err, CmsGraphError::Transport(_)));
    }

    #[tokio::test]
    async fn introspect_schema_returns_sdl() {
        let server = MockServer::start().await;
        let client = connected(&server).await;

        Mock::given(method("GET"))
            .and(path("/repositories/repo1/branches/master/graphql/schema"))
            .respond_with(ResponseTemplate::new(200).set_body_string("type Query { a: String }"))
            .mount(&server)
            .await;

        let sdl = client.introspect_schema(&branch()).await.expect("schema");
        assert!(sdl.contains("type Query"));
    }

    #[tokio::test]
    async fn execute_remote_query_forwards_operation() {
        let server = MockServer::start().await;
        let client = connected(&server).await;

        Mock::given(method("POST"))
            .and(path("/repositories/repo1/branches/master/graphql"))
            .and(body_json(json!({
                "query": "query Q { a }",
                "operationName": "Q",
                "variables": {"x": 1}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"a": "hi"}})))
            .mount(&server)
            .await;

        let mut variables = Map::new();
        variables.insert("x".into(), json!(1));
        let result = client
            .execute_remote_query(&branch(), "query Q { a }", Some("Q"), &variables)
            .await
            .expect("execute");
        assert_eq!(result["data"]["a"], "hi");
    }
}
