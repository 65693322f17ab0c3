//! Pagination driver: page query → normalize → resolve → register → attachments.

use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use cmsgraph_shared::{
    BranchRef, CmsGraphError, ContentSource, LocalNode, NodeInternal, NodeSink, PAGE_SIZE,
    PageRequest, RemoteDocument, Result,
};

use crate::attachments::materialize_attachments;
use crate::ids::local_id;
use crate::normalize::normalize;
use crate::resolve::resolve_document;

/// One document (or one of its attachments) that could not be ingested.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentFailure {
    /// Remote `_doc` id, or `<unknown>` if the document had none.
    pub doc_id: String,
    /// Attachment key when the failure happened during materialization.
    pub attachment: Option<String>,
    pub message: String,
}

/// Outcome of a full ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub pages_fetched: usize,
    pub documents_seen: usize,
    pub nodes_registered: usize,
    pub attachments_materialized: usize,
    pub failures: Vec<DocumentFailure>,
    pub duration: Duration,
}

impl IngestReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Summary stored alongside the ingest run.
    pub fn stats_json(&self) -> Value {
        json!({
            "pages_fetched": self.pages_fetched,
            "documents_seen": self.documents_seen,
            "nodes_registered": self.nodes_registered,
            "attachments_materialized": self.attachments_materialized,
            "failures": self.failures,
            "duration_ms": self.duration.as_millis() as u64,
        })
    }

    fn fail(&mut self, doc_id: String, attachment: Option<String>, error: &CmsGraphError) {
        warn!(%doc_id, attachment = ?attachment, error = %error, "document skipped");
        self.failures.push(DocumentFailure {
            doc_id,
            attachment,
            message: error.to_string(),
        });
    }
}

/// Progress callback for reporting ingestion status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each page query returns.
    fn page_fetched(&self, page: usize, size: usize);
    /// Called after each document, whether it succeeded or not.
    fn document_processed(&self, doc_id: &str, current: usize);
    /// Called when the run completes.
    fn done(&self, report: &IngestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_fetched(&self, _page: usize, _size: usize) {}
    fn document_processed(&self, _doc_id: &str, _current: usize) {}
    fn done(&self, _report: &IngestReport) {}
}

/// Ingest every document matching `query` on `branch`.
///
/// Pages of [`PAGE_SIZE`] are requested at increasing offsets until a page
/// reports a `size` below the page size. A short page is taken as the end of
/// the corpus even if the remote would have more.
///
/// Malformed documents and failed attachments are recorded in the report and
/// the run continues. A failed page query or a sink failure ends the run with
/// an error.
#[instrument(skip_all, fields(branch = %branch))]
pub async fn ingest_all(
    source: &dyn ContentSource,
    sink: &dyn NodeSink,
    branch: &BranchRef,
    query: &Value,
    progress: &dyn ProgressReporter,
) -> Result<IngestReport> {
    let start = Instant::now();
    let mut report = IngestReport::default();
    let mut skip = 0;

    progress.phase("Fetching documents");
    loop {
        let page = source.query_nodes(branch, query, PageRequest::at(skip)).await?;
        report.pages_fetched += 1;
        progress.page_fetched(report.pages_fetched, page.size);
        debug!(skip, size = page.size, "page fetched");

        for doc in page.rows {
            report.documents_seen += 1;
            let label = doc.label();
            ingest_document(source, sink, branch, doc, &mut report).await?;
            progress.document_processed(&label, report.documents_seen);
        }

        skip += page.size;
        if page.size < PAGE_SIZE {
            break;
        }
    }

    report.duration = start.elapsed();
    info!(
        pages = report.pages_fetched,
        documents = report.documents_seen,
        nodes = report.nodes_registered,
        attachments = report.attachments_materialized,
        failures = report.failures.len(),
        elapsed_ms = report.duration.as_millis() as u64,
        "ingestion complete"
    );
    progress.done(&report);
    Ok(report)
}

/// Normalize, resolve, register, and materialize one document.
///
/// Document-scoped failures are recorded in `report`; anything else is
/// returned.
async fn ingest_document(
    source: &dyn ContentSource,
    sink: &dyn NodeSink,
    branch: &BranchRef,
    doc: RemoteDocument,
    report: &mut IngestReport,
) -> Result<()> {
    let label = doc.label();

    let node = match build_node(sink, doc) {
        Ok(node) => node,
        Err(e) if e.is_document_scoped() => {
            report.fail(label, None, &e);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    sink.register_node(&node).await?;
    report.nodes_registered += 1;

    match materialize_attachments(source, sink, branch, &label, node.id, &node.fields).await {
        Ok(count) => report.attachments_materialized += count,
        Err(e) if e.source.is_document_scoped() => report.fail(label, e.key, &e.source),
        Err(e) => return Err(e.source),
    }
    Ok(())
}

/// Turn a remote document into a local node ready for registration.
pub fn build_node(sink: &dyn NodeSink, doc: RemoteDocument) -> Result<LocalNode> {
    let doc = normalize(doc)?;
    let doc_id = doc
        .doc_id()
        .map(str::to_string)
        .ok_or_else(|| CmsGraphError::malformed(doc.label(), "document has no _doc id"))?;
    let node_type = doc.type_name().unwrap_or_default().to_string();

    let fields = resolve_document(sink, doc)?;
    let content = Value::Object(fields.clone());

    Ok(LocalNode {
        id: local_id(sink, &doc_id),
        parent: None,
        children: Vec::new(),
        internal: NodeInternal {
            node_type,
            content: content.to_string(),
            content_digest: sink.content_digest(&content),
        },
        fields,
    })
}
