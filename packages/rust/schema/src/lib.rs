//! Remote GraphQL schema namespacing for cmsgraph.
//!
//! At source start the remote schema is introspected, stripped down to its
//! query root, renamed with a type prefix, and nested under a single field of
//! a new `Query` root ([`transform`]). The result is registered with the sink
//! together with a sentinel node that page dependencies point at. Queries
//! against the namespaced schema are delegated to the remote ([`execute`]).

pub mod bridge;
pub mod execute;
pub mod transform;

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod testing;

use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use cmsgraph_shared::{BranchRef, ContentSource, LocalId, LocalNode, NodeSink, Result};

pub use bridge::QueryBridge;
pub use execute::{GraphQLRequest, RequestContext};
pub use transform::{SchemaTransformConfig, TypeRenames};

use transform::Transformed;

/// Node type of the schema sentinel node.
pub const SENTINEL_NODE_TYPE: &str = "GraphQLSource";

/// Id of the sentinel node for a given type prefix.
pub fn sentinel_id(sink: &dyn NodeSink, type_name: &str) -> LocalId {
    sink.mint_id(&format!("graphql-source-{type_name}"))
}

/// The namespaced schema, ready to be registered and queried.
#[derive(Debug)]
pub struct TransformedSchema {
    inner: Transformed,
    config: SchemaTransformConfig,
    sentinel: LocalId,
}

impl TransformedSchema {
    /// Transform remote SDL. `sentinel` is the node page dependencies are
    /// recorded against.
    pub fn build(remote_sdl: &str, config: &SchemaTransformConfig, sentinel: LocalId) -> Result<Self> {
        Ok(Self {
            inner: transform::transform(remote_sdl, config)?,
            config: config.clone(),
            sentinel,
        })
    }

    /// The transformed schema as SDL.
    pub fn sdl(&self) -> String {
        self.inner.schema.to_string()
    }

    pub fn sentinel(&self) -> LocalId {
        self.sentinel
    }

    pub fn renames(&self) -> &TypeRenames {
        &self.inner.renames
    }

    /// Execute `request` by delegating each namespace field to the remote.
    ///
    /// Every time the namespace field is selected, `(ctx.path, sentinel)` is
    /// recorded as a page dependency.
    pub async fn execute(
        &self,
        bridge: &QueryBridge<'_>,
        sink: &dyn NodeSink,
        request: &GraphQLRequest,
        ctx: &RequestContext,
    ) -> Result<Value> {
        execute::execute(&self.inner, self.sentinel, bridge, sink, request, ctx).await
    }
}

/// Startup sequence: introspect the remote schema, transform it, register
/// the sentinel node, then register the SDL.
///
/// Any failure is fatal; nothing is registered unless the schema transformed
/// cleanly.
#[instrument(skip_all, fields(branch = %branch, type_name = %config.type_name))]
pub async fn source_schema(
    source: &dyn ContentSource,
    sink: &dyn NodeSink,
    branch: &BranchRef,
    config: &SchemaTransformConfig,
) -> Result<TransformedSchema> {
    let remote_sdl = source.introspect_schema(branch).await?;
    let schema = TransformedSchema::build(&remote_sdl, config, sentinel_id(sink, &config.type_name))?;

    sink.register_node(&sentinel_node(sink, &schema)).await?;
    sink.register_schema(&config.field_name, &schema.sdl()).await?;

    info!(
        types = schema.renames().len(),
        field = %config.field_name,
        "remote schema registered"
    );
    Ok(schema)
}

fn sentinel_node(sink: &dyn NodeSink, schema: &TransformedSchema) -> LocalNode {
    let mut fields = Map::new();
    fields.insert("typeName".into(), json!(schema.config.type_name));
    fields.insert("fieldName".into(), json!(schema.config.field_name));

    let mut node = LocalNode::new(schema.sentinel, SENTINEL_NODE_TYPE, fields);
    let content = Value::Object(node.fields.clone());
    node.internal.content_digest = sink.content_digest(&content);
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::REMOTE_SDL;
    use crate::testing::{RecordingSink, StubRemote};
    use apollo_compiler::{ExecutableDocument, Schema};
    use cmsgraph_shared::CmsGraphError;

    fn branch() -> BranchRef {
        BranchRef::new("repo1", "master")
    }

    async fn started(remote: &StubRemote, sink: &RecordingSink) -> TransformedSchema {
        source_schema(remote, sink, &branch(), &SchemaTransformConfig::default())
            .await
            .expect("schema startup")
    }

    /// Parse a forwarded query against the untouched remote schema.
    fn assert_valid_remotely(query: &str) {
        let schema = Schema::parse_and_validate(REMOTE_SDL, "remote.graphql").unwrap();
        if let Err(e) = ExecutableDocument::parse_and_validate(&schema, query, "forwarded.graphql") {
            panic!("forwarded query is not valid remotely:\n{query}\n{}", e.errors);
        }
    }

    #[tokio::test]
    async fn startup_registers_sentinel_then_schema() {
        let remote = StubRemote::new(REMOTE_SDL);
        let sink = RecordingSink::default();

        let schema = started(&remote, &sink).await;

        let nodes = sink.nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, schema.sentinel());
        assert_eq!(nodes[0].internal.node_type, SENTINEL_NODE_TYPE);
        assert_eq!(nodes[0].fields["typeName"], "CloudCMS");
        assert_eq!(nodes[0].fields["fieldName"], "cloudcms");

        let schemas = sink.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].0, "cloudcms");
        assert!(schemas[0].1.contains("cloudcms: CloudCMS_Query!"));
        assert!(!schemas[0].1.contains("Mutation"));
    }

    #[tokio::test]
    async fn sentinel_id_does_not_collide_with_documents() {
        let sink = RecordingSink::default();
        let id = sentinel_id(&sink, "CloudCMS");
        assert_eq!(id, sentinel_id(&sink, "CloudCMS"));
        assert_ne!(id, LocalId::mint("cloudcms-schema"));
        assert_ne!(id, sentinel_id(&sink, "Other"));
    }

    #[tokio::test]
    async fn bad_schema_registers_nothing() {
        let remote = StubRemote::new("type Mutation { a: String }");
        let sink = RecordingSink::default();

        let err = source_schema(&remote, &sink, &branch(), &SchemaTransformConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CmsGraphError::SchemaShape { .. }));
        assert!(sink.nodes().is_empty());
        assert!(sink.schemas().is_empty());
    }

    #[tokio::test]
    async fn namespace_field_delegates_once_and_records_dependency() {
        let remote = StubRemote::new(REMOTE_SDL).respond_with(json!({
            "data": {"article": {"__typename": "Article", "title": "Hello", "author": {"name": "Ana"}}}
        }));
        let sink = RecordingSink::default();
        let schema = started(&remote, &sink).await;
        let bridge = QueryBridge::new(&remote, branch());

        let request = GraphQLRequest::new(
            r#"query Page { cloudcms { article(id: "a1") { __typename title author { name } } } }"#,
        );
        let ctx = RequestContext {
            path: "/blog/hello/".into(),
        };
        let result = schema.execute(&bridge, &sink, &request, &ctx).await.unwrap();

        assert_eq!(
            result,
            json!({"data": {"cloudcms": {"article": {
                "__typename": "CloudCMS_Article",
                "title": "Hello",
                "author": {"name": "Ana"}
            }}}})
        );

        let calls = remote.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation_name.as_deref(), Some("Page"));
        assert!(!calls[0].query.contains("cloudcms"));
        assert_valid_remotely(&calls[0].query);

        assert_eq!(
            sink.dependencies(),
            vec![("/blog/hello/".to_string(), schema.sentinel())]
        );
    }

    #[tokio::test]
    async fn type_conditions_and_variables_map_back() {
        let remote = StubRemote::new(REMOTE_SDL).respond_with(json!({
            "data": {"search": [
                {"kind": "Article", "__typename": "Article", "title": "A"},
                {"kind": "Author", "__typename": "Author", "name": "B"}
            ]}
        }));
        let sink = RecordingSink::default();
        let schema = started(&remote, &sink).await;
        let bridge = QueryBridge::new(&remote, branch());

        let mut request = GraphQLRequest::new(
            r#"
            query Search($text: String!, $filter: CloudCMS_ArticleFilter, $unused: Int) {
                cloudcms {
                    search(text: $text) {
                        kind: __typename
                        ... on CloudCMS_Article { title }
                        ...AuthorName
                    }
                }
            }
            fragment AuthorName on CloudCMS_Author { name }
            fragment Unused on CloudCMS_Tag { title }
            "#,
        );
        request.operation_name = Some("Search".into());
        request.variables.insert("text".into(), json!("hello"));
        request.variables.insert("unused".into(), json!(3));

        let result = schema
            .execute(&bridge, &sink, &request, &RequestContext::default())
            .await;
        // `$filter` and `$unused` are declared but never used, which the
        // validator rejects.
        assert!(matches!(result, Err(CmsGraphError::Query { .. })));

        request.query = r#"
            query Search($text: String!, $filter: CloudCMS_ArticleFilter) {
                cloudcms {
                    search(text: $text) {
                        kind: __typename
                        __typename
                        ... on CloudCMS_Article { title }
                        ...AuthorName
                    }
                    articles(filter: $filter) { title }
                }
            }
            fragment AuthorName on CloudCMS_Author { name }
            "#
        .into();
        let result = schema
            .execute(&bridge, &sink, &request, &RequestContext::default())
            .await
            .unwrap();

        let calls = remote.calls();
        assert_eq!(calls.len(), 1);
        let forwarded = &calls[0].query;
        assert!(forwarded.contains("... on Article"));
        assert!(forwarded.contains("fragment AuthorName on Author"));
        assert!(forwarded.contains("$filter: ArticleFilter"));
        assert!(!forwarded.contains("CloudCMS_"));
        assert_valid_remotely(forwarded);
        assert_eq!(calls[0].variables.get("text"), Some(&json!("hello")));
        assert!(!calls[0].variables.contains_key("unused"));

        let search = &result["data"]["cloudcms"]["search"];
        assert_eq!(search[0]["kind"], "CloudCMS_Article");
        assert_eq!(search[1]["kind"], "CloudCMS_Author");
        assert_eq!(search[0]["__typename"], "CloudCMS_Article");
        assert_eq!(search[1]["__typename"], "CloudCMS_Author");
        assert_eq!(search[0]["title"], "A");
    }

    #[tokio::test]
    async fn each_response_key_is_one_round_trip() {
        let remote = StubRemote::new(REMOTE_SDL).respond_with(json!({"data": {"__typename": "Query"}}));
        let sink = RecordingSink::default();
        let schema = started(&remote, &sink).await;
        let bridge = QueryBridge::new(&remote, branch());

        let request = GraphQLRequest::new(
            "{ __typename a: cloudcms { __typename } b: cloudcms { __typename } }",
        );
        let ctx = RequestContext { path: "/".into() };
        let result = schema.execute(&bridge, &sink, &request, &ctx).await.unwrap();

        assert_eq!(remote.calls().len(), 2);
        assert_eq!(sink.dependencies().len(), 2);
        assert_eq!(result["data"]["__typename"], "Query");
        assert_eq!(result["data"]["a"]["__typename"], "CloudCMS_Query");
        assert_eq!(result["data"]["b"]["__typename"], "CloudCMS_Query");
    }

    #[tokio::test]
    async fn skipped_namespace_field_is_not_fetched() {
        let remote = StubRemote::new(REMOTE_SDL);
        let sink = RecordingSink::default();
        let schema = started(&remote, &sink).await;
        let bridge = QueryBridge::new(&remote, branch());

        let mut request = GraphQLRequest::new(
            "query Q($skip: Boolean!) { __typename cloudcms @skip(if: $skip) { __typename } }",
        );
        request.variables.insert("skip".into(), json!(true));
        let result = schema
            .execute(&bridge, &sink, &request, &RequestContext::default())
            .await
            .unwrap();

        assert!(remote.calls().is_empty());
        assert!(sink.dependencies().is_empty());
        assert_eq!(result, json!({"data": {"__typename": "Query"}}));
    }

    #[tokio::test]
    async fn remote_errors_pass_through_under_the_namespace() {
        let remote = StubRemote::new(REMOTE_SDL).respond_with(json!({
            "data": {"article": null},
            "errors": [{"message": "not found", "path": ["article"]}]
        }));
        let sink = RecordingSink::default();
        let schema = started(&remote, &sink).await;
        let bridge = QueryBridge::new(&remote, branch());

        let request = GraphQLRequest::new(r#"{ cloudcms { article(id: "x") { title } } }"#);
        let result = schema
            .execute(&bridge, &sink, &request, &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(result["data"]["cloudcms"]["article"], Value::Null);
        assert_eq!(result["errors"][0]["message"], "not found");
        assert_eq!(result["errors"][0]["path"], json!(["cloudcms", "article"]));
    }

    #[tokio::test]
    async fn invalid_queries_are_rejected_locally() {
        let remote = StubRemote::new(REMOTE_SDL);
        let sink = RecordingSink::default();
        let schema = started(&remote, &sink).await;
        let bridge = QueryBridge::new(&remote, branch());

        for query in [
            "{ article(id: \"a\") { title } }",
            "{ cloudcms { nope } }",
            "mutation { cloudcms { __typename } }",
            "query A { __typename } query B { __typename }",
        ] {
            let err = schema
                .execute(&bridge, &sink, &GraphQLRequest::new(query), &RequestContext::default())
                .await
                .unwrap_err();
            assert!(matches!(err, CmsGraphError::Query { .. }), "{query}: {err}");
        }
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_fails_the_request() {
        let remote = StubRemote::new(REMOTE_SDL).failing();
        let sink = RecordingSink::default();
        let schema = started(&remote, &sink).await;
        let bridge = QueryBridge::new(&remote, branch());

        let err = schema
            .execute(
                &bridge,
                &sink,
                &GraphQLRequest::new("{ cloudcms { __typename } }"),
                &RequestContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CmsGraphError::Transport(_)));
    }
}
