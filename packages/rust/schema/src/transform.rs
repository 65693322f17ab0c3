//! Remote schema → namespaced schema.
//!
//! Three stages run over a parsed remote schema:
//!
//! 1. strip: mutation and subscription roots are removed
//! 2. rename: every non built-in type `T` becomes `{type_name}_T`, with all
//!    references to it rewritten
//! 3. namespace: a new `Query` root gets a single non-null field whose type
//!    is the renamed remote query root
//!
//! The result is validated before it is handed out.

use std::collections::HashMap;

use apollo_compiler::schema::{
    Component, ComponentName, ExtendedType, FieldDefinition, InputValueDefinition, Name,
    ObjectType, Type,
};
use apollo_compiler::validation::Valid;
use apollo_compiler::{Node, Schema};
use tracing::debug;

use cmsgraph_shared::{CmsGraphError, Result};

/// Name of the root query type of the transformed schema.
pub const ROOT_QUERY: &str = "Query";

/// How a remote schema is namespaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaTransformConfig {
    /// Prefix for every remote type name (`{type_name}_{Type}`).
    pub type_name: String,
    /// Field on the new query root that exposes the remote query root.
    pub field_name: String,
}

impl Default for SchemaTransformConfig {
    fn default() -> Self {
        Self {
            type_name: "CloudCMS".into(),
            field_name: "cloudcms".into(),
        }
    }
}

impl From<&cmsgraph_shared::SchemaConfig> for SchemaTransformConfig {
    fn from(config: &cmsgraph_shared::SchemaConfig) -> Self {
        Self {
            type_name: config.type_name.clone(),
            field_name: config.field_name.clone(),
        }
    }
}

/// Type renames in both directions.
#[derive(Debug, Clone, Default)]
pub struct TypeRenames {
    forward: HashMap<String, Name>,
    reverse: HashMap<String, Name>,
}

impl TypeRenames {
    fn insert(&mut self, original: Name, renamed: Name) {
        self.forward.insert(original.to_string(), renamed.clone());
        self.reverse.insert(renamed.to_string(), original);
    }

    /// Local (prefixed) name for a remote type name.
    pub fn to_local(&self, remote: &str) -> Option<&Name> {
        self.forward.get(remote)
    }

    /// Remote name for a local (prefixed) type name.
    pub fn to_remote(&self, local: &str) -> Option<&Name> {
        self.reverse.get(local)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    fn rename(&self, name: &Name) -> Name {
        self.forward.get(name.as_str()).cloned().unwrap_or_else(|| name.clone())
    }

    fn rename_type(&self, ty: &Type) -> Type {
        map_named_type(ty, &|name| self.rename(name))
    }
}

/// Rebuild `ty` with its innermost named type replaced by `f(name)`.
pub(crate) fn map_named_type(ty: &Type, f: &dyn Fn(&Name) -> Name) -> Type {
    match ty {
        Type::Named(name) => Type::Named(f(name)),
        Type::NonNullNamed(name) => Type::NonNullNamed(f(name)),
        Type::List(inner) => Type::List(Box::new(map_named_type(inner, f))),
        Type::NonNullList(inner) => Type::NonNullList(Box::new(map_named_type(inner, f))),
    }
}

/// A transformed schema together with the bookkeeping needed to delegate
/// queries back to the remote.
#[derive(Debug)]
pub struct Transformed {
    pub schema: Valid<Schema>,
    pub renames: TypeRenames,
    /// Renamed remote query root, the type of the namespace field.
    pub nested_query: Name,
    pub field_name: Name,
}

/// Parse remote SDL and run all three stages.
pub fn transform(remote_sdl: &str, config: &SchemaTransformConfig) -> Result<Transformed> {
    let mut schema = Schema::parse(remote_sdl, "remote.graphql")
        .map_err(|e| CmsGraphError::schema_shape(format!("remote schema: {}", e.errors)))?;

    let query = strip_non_query_roots(&mut schema)?;
    let renames = rename_types(&mut schema, &config.type_name)?;
    let nested_query = renames.rename(&query);

    let field_name = Name::new(&config.field_name).map_err(|_| {
        CmsGraphError::schema_shape(format!("'{}' is not a valid field name", config.field_name))
    })?;
    namespace(&mut schema, &nested_query, &field_name)?;

    let schema = schema
        .validate()
        .map_err(|e| CmsGraphError::schema_shape(format!("transformed schema: {}", e.errors)))?;

    debug!(types = renames.len(), %nested_query, "remote schema transformed");
    Ok(Transformed {
        schema,
        renames,
        nested_query,
        field_name,
    })
}

/// Drop mutation and subscription roots. Returns the query root name.
fn strip_non_query_roots(schema: &mut Schema) -> Result<Name> {
    let definition = schema.schema_definition.make_mut();
    let query = definition
        .query
        .as_ref()
        .map(|root| root.name.clone())
        .ok_or_else(|| CmsGraphError::schema_shape("remote schema has no query root"))?;

    let stripped: Vec<Name> = [definition.mutation.take(), definition.subscription.take()]
        .into_iter()
        .flatten()
        .map(|root| root.name)
        .filter(|name| *name != query)
        .collect();

    for name in stripped {
        if is_referenced(schema, &name) {
            debug!(%name, "root type is referenced elsewhere, keeping it as a plain type");
            continue;
        }
        schema.types.shift_remove(&name);
    }

    match schema.types.get(&query) {
        Some(ExtendedType::Object(_)) => Ok(query),
        Some(_) => Err(CmsGraphError::schema_shape(format!(
            "query root '{query}' is not an object type"
        ))),
        None => Err(CmsGraphError::schema_shape(format!(
            "query root '{query}' is not defined"
        ))),
    }
}

/// Whether any field, argument, or union in `schema` mentions type `name`.
fn is_referenced(schema: &Schema, name: &Name) -> bool {
    let mentions = |ty: &Type| ty.inner_named_type() == name;
    let args_mention = |args: &[Node<InputValueDefinition>]| args.iter().any(|a| mentions(&*a.ty));

    schema.types.iter().filter(|(n, _)| *n != name).any(|(_, ty)| match ty {
        ExtendedType::Object(obj) => obj
            .fields
            .values()
            .any(|f| mentions(&f.ty) || args_mention(f.arguments.as_slice())),
        ExtendedType::Interface(iface) => iface
            .fields
            .values()
            .any(|f| mentions(&f.ty) || args_mention(f.arguments.as_slice())),
        ExtendedType::Union(union_) => union_.members.iter().any(|m| m.name == *name),
        _ => false,
    })
}

/// Rename every non built-in type and rewrite every reference to it.
fn rename_types(schema: &mut Schema, prefix: &str) -> Result<TypeRenames> {
    let mut renames = TypeRenames::default();
    for (name, ty) in &schema.types {
        if ty.is_built_in() {
            continue;
        }
        let renamed = format!("{prefix}_{name}");
        let renamed = Name::new(&renamed).map_err(|_| {
            CmsGraphError::schema_shape(format!("'{renamed}' is not a valid type name"))
        })?;
        renames.insert(name.clone(), renamed);
    }

    let types = std::mem::take(&mut schema.types);
    for (name, mut ty) in types {
        if !ty.is_built_in() {
            rename_extended_type(&mut ty, &renames);
        }
        schema.types.insert(renames.rename(&name), ty);
    }

    for directive in schema.directive_definitions.values_mut() {
        let directive = directive.make_mut();
        rename_arguments(&mut directive.arguments, &renames);
    }

    let definition = schema.schema_definition.make_mut();
    if let Some(query) = definition.query.as_mut() {
        *query = ComponentName::from(renames.rename(&query.name));
    }

    Ok(renames)
}

fn rename_extended_type(ty: &mut ExtendedType, renames: &TypeRenames) {
    match ty {
        ExtendedType::Scalar(scalar) => {
            let scalar = scalar.make_mut();
            scalar.name = renames.rename(&scalar.name);
        }
        ExtendedType::Object(obj) => {
            let obj = obj.make_mut();
            obj.name = renames.rename(&obj.name);
            obj.implements_interfaces = rename_components(&obj.implements_interfaces, renames);
            for field in obj.fields.values_mut() {
                rename_field(field, renames);
            }
        }
        ExtendedType::Interface(iface) => {
            let iface = iface.make_mut();
            iface.name = renames.rename(&iface.name);
            iface.implements_interfaces =
                rename_components(&iface.implements_interfaces, renames);
            for field in iface.fields.values_mut() {
                rename_field(field, renames);
            }
        }
        ExtendedType::Union(union_) => {
            let union_ = union_.make_mut();
            union_.name = renames.rename(&union_.name);
            union_.members = rename_components(&union_.members, renames);
        }
        ExtendedType::Enum(enum_) => {
            let enum_ = enum_.make_mut();
            enum_.name = renames.rename(&enum_.name);
        }
        ExtendedType::InputObject(input) => {
            let input = input.make_mut();
            input.name = renames.rename(&input.name);
            for field in input.fields.values_mut() {
                let field = field.make_mut();
                field.ty = Node::new(renames.rename_type(&field.ty));
            }
        }
    }
}

fn rename_components<C>(names: &C, renames: &TypeRenames) -> C
where
    for<'a> &'a C: IntoIterator<Item = &'a ComponentName>,
    C: FromIterator<ComponentName>,
{
    names
        .into_iter()
        .map(|c| ComponentName::from(renames.rename(&c.name)))
        .collect()
}

fn rename_field(field: &mut Component<FieldDefinition>, renames: &TypeRenames) {
    let field = field.make_mut();
    field.ty = renames.rename_type(&field.ty);
    rename_arguments(&mut field.arguments, renames);
}

fn rename_arguments(arguments: &mut [Node<InputValueDefinition>], renames: &TypeRenames) {
    for arg in arguments {
        let arg = arg.make_mut();
        arg.ty = Node::new(renames.rename_type(&arg.ty));
    }
}

/// Build the new query root around the already renamed remote root.
fn namespace(schema: &mut Schema, nested_query: &Name, field_name: &Name) -> Result<()> {
    let root = Name::new(ROOT_QUERY).map_err(|e| CmsGraphError::schema_shape(e.to_string()))?;
    if schema.types.contains_key(&root) {
        return Err(CmsGraphError::schema_shape(format!(
            "type '{ROOT_QUERY}' already exists after renaming"
        )));
    }

    let field = FieldDefinition {
        description: None,
        name: field_name.clone(),
        arguments: Vec::new(),
        ty: Type::NonNullNamed(nested_query.clone()),
        directives: Default::default(),
    };
    let mut fields = apollo_compiler::collections::IndexMap::default();
    fields.insert(field_name.clone(), Component::new(field));

    let query = ObjectType {
        description: None,
        name: root.clone(),
        implements_interfaces: Default::default(),
        directives: Default::default(),
        fields,
    };
    schema
        .types
        .insert(root.clone(), ExtendedType::Object(Node::new(query)));
    schema.schema_definition.make_mut().query = Some(ComponentName::from(root));
    Ok(())
}
