//! Ingestion pipeline for cmsgraph.
//!
//! Turns pages of Cloud CMS documents into content graph nodes: ids are
//! minted by [`ids`], documents are cleaned up by [`normalize`], inline
//! references become foreign-key edges in [`resolve`], binaries are stored by
//! [`attachments`], and [`pipeline`] drives the whole thing page by page.

pub mod attachments;
pub mod ids;
pub mod normalize;
pub mod pipeline;
pub mod resolve;

#[cfg(test)]
mod testing;

pub use attachments::{AttachmentError, materialize_attachments};
pub use ids::local_id;
pub use normalize::{normalize, sanitize_type_name};
pub use pipeline::{
    DocumentFailure, IngestReport, ProgressReporter, SilentProgress, build_node, ingest_all,
};
pub use resolve::{Shape, resolve_document};
