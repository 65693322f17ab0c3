//! Document normalization: reserved field removal and type name sanitizing.

use std::sync::LazyLock;

use regex::Regex;

use cmsgraph_shared::{CmsGraphError, RemoteDocument, Result};

/// Fields dropped from every document before registration.
pub const RESERVED_FIELDS: &[&str] = &["fields"];

/// Characters that cannot appear in a node type name.
static TYPE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[!$():=@\[\]{|}\-]").expect("valid regex"));

/// Replace every character that is illegal in a node type name with `_`.
pub fn sanitize_type_name(type_name: &str) -> String {
    TYPE_NAME_RE.replace_all(type_name, "_").into_owned()
}

/// Strip reserved fields and sanitize `_type` in place.
///
/// Fails with [`CmsGraphError::MalformedDocument`] when `_type` is missing or
/// not a string.
pub fn normalize(mut doc: RemoteDocument) -> Result<RemoteDocument> {
    let type_name = doc
        .type_name()
        .map(sanitize_type_name)
        .ok_or_else(|| CmsGraphError::malformed(doc.label(), "document has no _type"))?;

    let fields = doc.fields_mut();
    for reserved in RESERVED_FIELDS {
        fields.remove(*reserved);
    }
    fields.insert("_type".into(), type_name.into());
    Ok(doc)
}
