//! Shared types, error model, configuration, and boundary traits for cmsgraph.
//!
//! This crate is the foundation depended on by all other cmsgraph crates.
//! It provides:
//! - [`CmsGraphError`], the unified error type
//! - Domain types ([`RemoteDocument`], [`LocalNode`], [`LocalId`], [`PageResult`])
//! - The [`ContentSource`] and [`NodeSink`] traits the pipelines run against
//! - Configuration ([`AppConfig`], [`SourceOptions`], config loading)

pub mod config;
pub mod error;
pub mod sink;
pub mod source;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, Credentials, KeysConfig, SchemaConfig, SourceConfig, SourceOptions,
    StorageConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    load_keys_file, resolve_storage_path,
};
pub use error::{CmsGraphError, Result};
pub use sink::{FileArtifact, NodeSink, is_plain_file_name};
pub use source::{ByteStream, ContentSource};
pub use types::{
    AttachmentDescriptor, BranchRef, FOREIGN_KEY_SUFFIX, LocalId, LocalNode, NodeInternal,
    PAGE_SIZE, PageRequest, PageResult, RemoteDocument, content_digest,
};
