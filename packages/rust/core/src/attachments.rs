//! Attachment materialization for registered nodes.

use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use cmsgraph_shared::{
    AttachmentDescriptor, BranchRef, CmsGraphError, ContentSource, FileArtifact, LocalId,
    NodeSink, is_plain_file_name,
};

/// Field the rewritten attachment map is published under.
pub const SYSTEM_FIELD: &str = "_system";

/// A failure while materializing one node's attachments.
///
/// `key` names the attachment being processed, or is `None` when the failure
/// happened while publishing the rewritten map.
#[derive(Debug, thiserror::Error)]
#[error("{}: {source}", .key.as_deref().unwrap_or(SYSTEM_FIELD))]
pub struct AttachmentError {
    pub key: Option<String>,
    #[source]
    pub source: CmsGraphError,
}

impl AttachmentError {
    fn at(key: &str, source: CmsGraphError) -> Self {
        Self {
            key: Some(key.to_string()),
            source,
        }
    }
}

/// Base name for an attachment: everything before the first `.` of the
/// upload filename.
pub fn clean_base_name(filename: &str) -> &str {
    filename.split('.').next().unwrap_or(filename)
}

/// Fetch, materialize, and link every attachment of a registered node.
///
/// `fields` are the node's resolved fields; attachments are read from
/// `_system.attachments`. Each attachment is downloaded in full, stored as a
/// file artifact owned by `node_id`, and its descriptor gains a
/// `path___NODE` edge to that artifact. The rewritten `_system` object is
/// then published as one field update on the node. If any attachment fails
/// the update is not published.
///
/// Returns the number of attachments materialized.
#[instrument(skip_all, fields(doc_id = %doc_id, node_id = %node_id))]
pub async fn materialize_attachments(
    source: &dyn ContentSource,
    sink: &dyn NodeSink,
    branch: &BranchRef,
    doc_id: &str,
    node_id: LocalId,
    fields: &Map<String, Value>,
) -> Result<usize, AttachmentError> {
    let Some(system) = fields.get(SYSTEM_FIELD).and_then(Value::as_object) else {
        return Ok(0);
    };
    let Some(attachments) = system.get("attachments").and_then(Value::as_object) else {
        return Ok(0);
    };

    let mut rewritten = Map::new();
    for (key, raw) in attachments {
        let mut descriptor: AttachmentDescriptor = serde_json::from_value(raw.clone())
            .map_err(|e| {
                AttachmentError::at(
                    key,
                    CmsGraphError::malformed(doc_id, format!("attachment '{key}': {e}")),
                )
            })?;

        let name = clean_base_name(&descriptor.filename).to_string();
        let ext = format!(".{}", descriptor.ext);
        let unusable = descriptor.filename.contains(['/', '\\'])
            || !is_plain_file_name(&format!("{name}{ext}"));
        if unusable {
            return Err(AttachmentError::at(
                key,
                CmsGraphError::malformed(
                    doc_id,
                    format!(
                        "attachment '{key}': '{}' is not a plain file name",
                        descriptor.filename
                    ),
                ),
            ));
        }

        let buffer = download(source, branch, doc_id, key)
            .await
            .map_err(|e| AttachmentError::at(key, e))?;

        let artifact = FileArtifact {
            buffer,
            ext,
            name,
            owner_id: node_id,
        };
        debug!(key = %key, file = %artifact.file_name(), bytes = artifact.buffer.len(), "materializing attachment");

        let artifact_id = sink
            .materialize_file(artifact)
            .await
            .map_err(|e| AttachmentError::at(key, e))?;
        descriptor.path = Some(artifact_id);

        let value = serde_json::to_value(&descriptor).map_err(|e| {
            AttachmentError::at(key, CmsGraphError::malformed(doc_id, e.to_string()))
        })?;
        rewritten.insert(key.clone(), value);
    }

    let count = rewritten.len();
    let mut new_system = system.clone();
    new_system.insert("attachments".into(), Value::Object(rewritten));
    sink.update_node_field(&node_id, SYSTEM_FIELD, &Value::Object(new_system))
        .await
        .map_err(|source| AttachmentError { key: None, source })?;

    Ok(count)
}

/// Drain an attachment stream into one buffer.
async fn download(
    source: &dyn ContentSource,
    branch: &BranchRef,
    doc_id: &str,
    key: &str,
) -> cmsgraph_shared::Result<Bytes> {
    let stream = source.download_attachment(branch, doc_id, key).await?;
    let buffer = stream
        .try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await?;
    Ok(buffer.freeze())
}
