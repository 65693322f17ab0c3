//! Delegated execution of operations against the namespaced schema.
//!
//! The namespaced schema has no resolvers of its own. An incoming operation
//! is validated locally, then every response key selecting the namespace
//! field becomes one remote operation built from that field's sub-selection,
//! with local (prefixed) type names mapped back to remote names. Remote
//! `__typename` values are mapped forward again on the way back.

use std::collections::HashMap;

use apollo_compiler::ast::{self, Definition, OperationType, Selection};
use apollo_compiler::executable::ExecutableDocument;
use apollo_compiler::{Name, Node};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use cmsgraph_shared::{CmsGraphError, LocalId, NodeSink, Result};

use crate::bridge::QueryBridge;
use crate::transform::{ROOT_QUERY, Transformed, map_named_type};

/// A GraphQL request against the namespaced schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// Per-request context supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Page path the query is being run for. Recorded as depending on the
    /// schema sentinel node.
    pub path: String,
}

#[instrument(skip_all, fields(path = %ctx.path, operation_name = ?request.operation_name))]
pub(crate) async fn execute(
    transformed: &Transformed,
    sentinel: LocalId,
    bridge: &QueryBridge<'_>,
    sink: &dyn NodeSink,
    request: &GraphQLRequest,
    ctx: &RequestContext,
) -> Result<Value> {
    ExecutableDocument::parse_and_validate(&transformed.schema, &request.query, "request.graphql")
        .map_err(|e| CmsGraphError::query(e.errors.to_string()))?;
    let document = ast::Document::parse(&request.query, "request.graphql")
        .map_err(|e| CmsGraphError::query(e.errors.to_string()))?;

    let operation = select_operation(&document, request.operation_name.as_deref())?;
    if operation.operation_type != OperationType::Query {
        return Err(CmsGraphError::query(format!(
            "only query operations are supported, got {:?}",
            operation.operation_type
        )));
    }

    let delegation = Delegation::new(transformed, &document, operation, &request.variables);
    let mut root_fields = Vec::new();
    delegation.collect_root_fields(&operation.selection_set, &mut root_fields);

    let mut data = Map::new();
    let mut groups: Vec<(String, Vec<&Node<ast::Field>>)> = Vec::new();
    for field in root_fields {
        let key = response_key(field);
        if field.name.as_str() == "__typename" {
            data.insert(key, json!(ROOT_QUERY));
        } else if field.name == transformed.field_name {
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, fields)) => fields.push(field),
                None => groups.push((key, vec![field])),
            }
        } else {
            return Err(CmsGraphError::query(format!(
                "field '{}' cannot be resolved on the namespaced schema",
                field.name
            )));
        }
    }

    let mut errors = Vec::new();
    let mut data_is_null = false;
    for (key, fields) in groups {
        sink.record_dependency(&ctx.path, &sentinel).await?;

        let selections: Vec<Selection> = fields
            .iter()
            .flat_map(|f| f.selection_set.iter().cloned())
            .collect();
        let (remote_document, variables) = delegation.remote_operation(&selections);
        let response = bridge
            .execute(
                &remote_document,
                &variables,
                operation.name.as_ref().map(Name::as_str),
            )
            .await?;

        let (remote_data, remote_errors) = split_response(response);
        errors.extend(remote_errors.into_iter().map(|e| prefix_error_path(e, &key)));
        match remote_data {
            Value::Null => data_is_null = true,
            mut value => {
                delegation.prefix_typenames(&selections, &mut value);
                data.insert(key, value);
            }
        }
    }

    debug!(errors = errors.len(), "request delegated");
    let mut response = Map::new();
    response.insert(
        "data".into(),
        if data_is_null {
            Value::Null
        } else {
            Value::Object(data)
        },
    );
    if !errors.is_empty() {
        response.insert("errors".into(), Value::Array(errors));
    }
    Ok(Value::Object(response))
}

fn select_operation<'d>(
    document: &'d ast::Document,
    name: Option<&str>,
) -> Result<&'d Node<ast::OperationDefinition>> {
    let mut operations = document.definitions.iter().filter_map(|d| match d {
        Definition::OperationDefinition(op) => Some(op),
        _ => None,
    });
    match name {
        Some(name) => operations
            .find(|op| op.name.as_ref().is_some_and(|n| n.as_str() == name))
            .ok_or_else(|| CmsGraphError::query(format!("unknown operation '{name}'"))),
        None => {
            let first = operations
                .next()
                .ok_or_else(|| CmsGraphError::query("document has no operation"))?;
            if operations.next().is_some() {
                return Err(CmsGraphError::query(
                    "document has several operations, an operation name is required",
                ));
            }
            Ok(first)
        }
    }
}

fn response_key(field: &ast::Field) -> String {
    field.alias.as_ref().unwrap_or(&field.name).to_string()
}

/// Split a raw remote response into its `data` and `errors`.
fn split_response(response: Value) -> (Value, Vec<Value>) {
    let Value::Object(mut response) = response else {
        return (
            Value::Null,
            vec![json!({"message": "remote returned a non-object response"})],
        );
    };
    let data = response.remove("data").unwrap_or(Value::Null);
    let errors = match response.remove("errors") {
        Some(Value::Array(errors)) => errors,
        _ => Vec::new(),
    };
    (data, errors)
}

/// Remote error paths start at the remote root; anchor them under `key`.
fn prefix_error_path(mut error: Value, key: &str) -> Value {
    if let Some(Value::Array(path)) = error.get_mut("path") {
        path.insert(0, Value::String(key.to_string()));
    }
    error
}

struct Delegation<'d> {
    transformed: &'d Transformed,
    operation: &'d ast::OperationDefinition,
    fragments: HashMap<&'d str, &'d ast::FragmentDefinition>,
    variables: &'d Map<String, Value>,
}

impl<'d> Delegation<'d> {
    fn new(
        transformed: &'d Transformed,
        document: &'d ast::Document,
        operation: &'d ast::OperationDefinition,
        variables: &'d Map<String, Value>,
    ) -> Self {
        let fragments = document
            .definitions
            .iter()
            .filter_map(|d| match d {
                Definition::FragmentDefinition(f) => Some((f.name.as_str(), &**f)),
                _ => None,
            })
            .collect();
        Self {
            transformed,
            operation,
            fragments,
            variables,
        }
    }

    /// Flatten root fragments and drop root selections excluded by
    /// `@skip`/`@include`.
    fn collect_root_fields(&self, selections: &'d [Selection], out: &mut Vec<&'d Node<ast::Field>>) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if self.included(&field.directives) {
                        out.push(field);
                    }
                }
                Selection::InlineFragment(inline) => {
                    if self.included(&inline.directives) {
                        self.collect_root_fields(&inline.selection_set, out);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives) {
                        continue;
                    }
                    if let Some(fragment) = self.fragments.get(spread.fragment_name.as_str()) {
                        self.collect_root_fields(&fragment.selection_set, out);
                    }
                }
            }
        }
    }

    fn included(&self, directives: &ast::DirectiveList) -> bool {
        for directive in directives.iter() {
            let condition = directive
                .arguments
                .iter()
                .find(|arg| arg.name.as_str() == "if")
                .map(|arg| self.bool_value(&arg.value));
            match (directive.name.as_str(), condition) {
                ("skip", Some(true)) | ("include", Some(false)) => return false,
                _ => {}
            }
        }
        true
    }

    fn bool_value(&self, value: &ast::Value) -> bool {
        match value {
            ast::Value::Boolean(b) => *b,
            ast::Value::Variable(name) => self
                .variables
                .get(name.as_str())
                .and_then(Value::as_bool)
                .or_else(|| {
                    self.operation
                        .variables
                        .iter()
                        .find(|def| def.name == *name)
                        .and_then(|def| def.default_value.as_deref())
                        .and_then(|default| match default {
                            ast::Value::Boolean(b) => Some(*b),
                            _ => None,
                        })
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Build the remote document for one namespace field's sub-selection,
    /// and the subset of request variables it uses.
    fn remote_operation(&self, selections: &[Selection]) -> (ast::Document, Map<String, Value>) {
        let mut used_variables = Vec::new();
        let mut used_fragments = Vec::new();
        self.collect_references(selections, &mut used_variables, &mut used_fragments);

        let variable_definitions = self
            .operation
            .variables
            .iter()
            .filter(|def| used_variables.contains(&def.name))
            .map(|def| {
                let mut def = (**def).clone();
                def.ty = Node::new(map_named_type(&def.ty, &|n| self.remote_name(n)));
                Node::new(def)
            })
            .collect();

        let mut document = ast::Document::new();
        document
            .definitions
            .push(Definition::OperationDefinition(Node::new(ast::OperationDefinition {
                operation_type: OperationType::Query,
                name: self.operation.name.clone(),
                variables: variable_definitions,
                directives: Default::default(),
                selection_set: self.to_remote_selections(selections),
            })));

        for name in &used_fragments {
            let Some(fragment) = self.fragments.get(name.as_str()) else {
                continue;
            };
            document
                .definitions
                .push(Definition::FragmentDefinition(Node::new(ast::FragmentDefinition {
                    name: fragment.name.clone(),
                    type_condition: self.remote_name(&fragment.type_condition),
                    directives: fragment.directives.clone(),
                    selection_set: self.to_remote_selections(&fragment.selection_set),
                })));
        }

        let variables = self
            .variables
            .iter()
            .filter(|(name, _)| used_variables.iter().any(|used| used.as_str() == name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        (document, variables)
    }

    fn remote_name(&self, local: &Name) -> Name {
        self.transformed
            .renames
            .to_remote(local.as_str())
            .cloned()
            .unwrap_or_else(|| local.clone())
    }

    fn to_remote_selections(&self, selections: &[Selection]) -> Vec<Selection> {
        selections
            .iter()
            .map(|selection| match selection {
                Selection::Field(field) => {
                    let mut field = (**field).clone();
                    field.selection_set = self.to_remote_selections(&field.selection_set);
                    Selection::Field(Node::new(field))
                }
                Selection::InlineFragment(inline) => {
                    let mut inline = (**inline).clone();
                    inline.type_condition =
                        inline.type_condition.as_ref().map(|t| self.remote_name(t));
                    inline.selection_set = self.to_remote_selections(&inline.selection_set);
                    Selection::InlineFragment(Node::new(inline))
                }
                Selection::FragmentSpread(_) => selection.clone(),
            })
            .collect()
    }

    /// Variables and fragments reachable from `selections`, in first-use order.
    fn collect_references(
        &self,
        selections: &[Selection],
        variables: &mut Vec<Name>,
        fragments: &mut Vec<Name>,
    ) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    for arg in &field.arguments {
                        value_variables(&arg.value, variables);
                    }
                    directive_variables(&field.directives, variables);
                    self.collect_references(&field.selection_set, variables, fragments);
                }
                Selection::InlineFragment(inline) => {
                    directive_variables(&inline.directives, variables);
                    self.collect_references(&inline.selection_set, variables, fragments);
                }
                Selection::FragmentSpread(spread) => {
                    directive_variables(&spread.directives, variables);
                    if fragments.contains(&spread.fragment_name) {
                        continue;
                    }
                    fragments.push(spread.fragment_name.clone());
                    if let Some(fragment) = self.fragments.get(spread.fragment_name.as_str()) {
                        directive_variables(&fragment.directives, variables);
                        self.collect_references(&fragment.selection_set, variables, fragments);
                    }
                }
            }
        }
    }

    /// Map remote `__typename` values in `value` to local type names.
    fn prefix_typenames(&self, selections: &[Selection], value: &mut Value) {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.prefix_typenames(selections, item);
                }
            }
            Value::Object(object) => {
                let mut typename_keys = Vec::new();
                let mut children: Vec<(String, Vec<Selection>)> = Vec::new();
                let mut seen_fragments = Vec::new();
                self.group_fields(
                    selections,
                    &mut typename_keys,
                    &mut children,
                    &mut seen_fragments,
                );

                for key in typename_keys {
                    if let Some(Value::String(type_name)) = object.get_mut(&key) {
                        if let Some(local) = self.transformed.renames.to_local(type_name) {
                            *type_name = local.to_string();
                        }
                    }
                }
                for (key, sub_selections) in children {
                    if let Some(child) = object.get_mut(&key) {
                        self.prefix_typenames(&sub_selections, child);
                    }
                }
            }
            _ => {}
        }
    }

    /// Group the fields of one object level by response key.
    fn group_fields(
        &self,
        selections: &[Selection],
        typename_keys: &mut Vec<String>,
        children: &mut Vec<(String, Vec<Selection>)>,
        seen_fragments: &mut Vec<Name>,
    ) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    let key = response_key(field);
                    if field.name.as_str() == "__typename" {
                        if !typename_keys.contains(&key) {
                            typename_keys.push(key);
                        }
                    } else if !field.selection_set.is_empty() {
                        let sub = field.selection_set.iter().cloned();
                        match children.iter_mut().find(|(k, _)| *k == key) {
                            Some((_, existing)) => existing.extend(sub),
                            None => children.push((key, sub.collect())),
                        }
                    }
                }
                Selection::InlineFragment(inline) => {
                    self.group_fields(&inline.selection_set, typename_keys, children, seen_fragments);
                }
                Selection::FragmentSpread(spread) => {
                    if seen_fragments.contains(&spread.fragment_name) {
                        continue;
                    }
                    seen_fragments.push(spread.fragment_name.clone());
                    if let Some(fragment) = self.fragments.get(spread.fragment_name.as_str()) {
                        self.group_fields(
                            &fragment.selection_set,
                            typename_keys,
                            children,
                            seen_fragments,
                        );
                    }
                }
            }
        }
    }
}

fn directive_variables(directives: &ast::DirectiveList, out: &mut Vec<Name>) {
    for directive in directives.iter() {
        for arg in &directive.arguments {
            value_variables(&arg.value, out);
        }
    }
}

fn value_variables(value: &ast::Value, out: &mut Vec<Name>) {
    match value {
        ast::Value::Variable(name) => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        ast::Value::List(items) => {
            for item in items {
                value_variables(item, out);
            }
        }
        ast::Value::Object(fields) => {
            for (_, item) in fields {
                value_variables(item, out);
            }
        }
        _ => {}
    }
}
