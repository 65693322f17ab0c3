//! Reference resolution: inline `{ref: "..."}` objects become `___NODE`
//! foreign-key edges pointing at local node ids.

use serde_json::{Map, Value};

use cmsgraph_shared::{CmsGraphError, FOREIGN_KEY_SUFFIX, NodeSink, RemoteDocument, Result};

use crate::ids::local_id;

/// Field that marks an object as a reference to another document.
pub const REF_FIELD: &str = "ref";

/// How a value is treated during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Strings, numbers, booleans, null.
    Scalar,
    /// An object carrying a `ref` field.
    ReferenceObject,
    /// An object without a `ref` field.
    PlainObject,
    /// A non-empty array whose first element is a reference object. The whole
    /// array is classified by that first element.
    ReferenceSequence,
    /// Any other array, including the empty one.
    OtherSequence,
}

impl Shape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(map) if map.contains_key(REF_FIELD) => Shape::ReferenceObject,
            Value::Object(_) => Shape::PlainObject,
            Value::Array(items) => match items.first() {
                Some(first) if Shape::of(first) == Shape::ReferenceObject => {
                    Shape::ReferenceSequence
                }
                _ => Shape::OtherSequence,
            },
            _ => Shape::Scalar,
        }
    }
}

/// Resolve every top-level field of a normalized document.
///
/// Returns the fields of the local node: reference objects are replaced by
/// `<key>___NODE` edges and no `ref`-bearing object remains anywhere in the
/// tree. Fails with [`CmsGraphError::MalformedDocument`] on a `ref` that is
/// not a non-empty path, on an array that mixes references with other
/// values, and on a reference with no field name to carry the edge (a
/// reference nested directly inside a non-reference array).
pub fn resolve_document(sink: &dyn NodeSink, doc: RemoteDocument) -> Result<Map<String, Value>> {
    let resolver = Resolver {
        sink,
        doc_id: doc.label(),
    };
    resolver.resolve_object(doc.into_fields())
}

struct Resolver<'a> {
    sink: &'a dyn NodeSink,
    doc_id: String,
}

impl Resolver<'_> {
    fn resolve_object(&self, fields: Map<String, Value>) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        for (key, value) in fields {
            match Shape::of(&value) {
                Shape::Scalar => {
                    out.insert(key, value);
                }
                Shape::ReferenceObject => {
                    let id = self.reference_id(&key, &value)?;
                    out.insert(format!("{key}{FOREIGN_KEY_SUFFIX}"), id);
                }
                Shape::PlainObject => {
                    out.insert(key, self.resolve_value(value)?);
                }
                Shape::ReferenceSequence => {
                    let ids = value
                        .as_array()
                        .into_iter()
                        .flatten()
                        .map(|item| self.reference_id(&key, item))
                        .collect::<Result<Vec<_>>>()?;
                    out.insert(format!("{key}{FOREIGN_KEY_SUFFIX}"), Value::Array(ids));
                }
                Shape::OtherSequence => {
                    out.insert(key, self.resolve_value(value)?);
                }
            }
        }
        Ok(out)
    }

    /// Resolve a value that has no field name of its own.
    fn resolve_value(&self, value: Value) -> Result<Value> {
        match value {
            Value::Object(map) if map.contains_key(REF_FIELD) => Err(self.malformed(
                "reference inside an array of non-references has no field to hold its edge",
            )),
            Value::Object(map) => Ok(Value::Object(self.resolve_object(map)?)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            scalar => Ok(scalar),
        }
    }

    /// Local id for one reference object under `key`.
    fn reference_id(&self, key: &str, value: &Value) -> Result<Value> {
        let reference = match value {
            Value::Object(map) => map.get(REF_FIELD),
            _ => None,
        };
        let Some(reference) = reference else {
            return Err(self.malformed(format!(
                "array '{key}' mixes references with other values"
            )));
        };
        let Some(path) = reference.as_str() else {
            return Err(self.malformed(format!("'{key}.ref' is not a string")));
        };
        let remote_id = path.rsplit('/').next().unwrap_or_default();
        if remote_id.is_empty() {
            return Err(self.malformed(format!("'{key}.ref' has no document id: {path:?}")));
        }
        Ok(local_id(self.sink, remote_id).into())
    }

    fn malformed(&self, message: impl Into<String>) -> CmsGraphError {
        CmsGraphError::malformed(self.doc_id.clone(), message)
    }
}
