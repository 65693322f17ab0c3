//! libSQL-backed node store (offline mode).
//!
//! [`NodeStore`] is the concrete [`NodeSink`] the CLI writes into. It keeps
//! registered nodes, field updates, file artifacts, registered schemas, page
//! dependencies, and ingestion run history. Materialized files are written to
//! a content-addressed directory next to the database.

mod migrations;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use cmsgraph_shared::{CmsGraphError, FileArtifact, LocalId, LocalNode, NodeSink, Result};

/// Node type assigned to materialized file artifacts.
pub const FILE_NODE_TYPE: &str = "File";

/// Primary storage handle wrapping a libSQL database.
pub struct NodeStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    files_dir: PathBuf,
}

/// A node as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredNode {
    pub id: String,
    pub node_type: String,
    pub parent_id: Option<String>,
    pub content_digest: String,
    /// Registered fields with any later field updates applied on top.
    pub fields: Map<String, Value>,
    pub updated_at: String,
}

/// One recorded ingestion run.
#[derive(Debug, Clone)]
pub struct IngestRun {
    pub id: String,
    pub branch: String,
    pub started_at: String,
    /// `None` while the run is still open.
    pub finished_at: Option<String>,
    pub stats: Option<Value>,
}

/// A file artifact as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub ext: String,
    pub path: PathBuf,
    pub size: u64,
}

fn db_err(e: impl std::fmt::Display) -> CmsGraphError {
    CmsGraphError::Storage(e.to_string())
}

impl NodeStore {
    /// Open or create a store with its database at `db_path` and file
    /// artifacts under `files_dir`.
    pub async fn open(db_path: &Path, files_dir: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CmsGraphError::io(parent, e))?;
        }
        std::fs::create_dir_all(files_dir).map_err(|e| CmsGraphError::io(files_dir, e))?;

        let db = libsql::Builder::new_local(db_path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let store = Self {
            db,
            conn,
            files_dir: files_dir.to_path_buf(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CmsGraphError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Node reads
    // -----------------------------------------------------------------------

    /// Get a node by id, with field updates merged in.
    pub async fn get_node(&self, id: &LocalId) -> Result<Option<StoredNode>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, node_type, parent_id, content_digest, fields_json, updated_at
                 FROM nodes WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let node = match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_node(&row)?,
            None => return Ok(None),
        };
        let mut node = node;
        for (field, value) in self.get_node_fields(id).await? {
            node.fields.insert(field, value);
        }
        Ok(Some(node))
    }

    /// List nodes, optionally restricted to one type, ordered by id.
    /// Field updates are not merged in.
    pub async fn list_nodes(&self, node_type: Option<&str>) -> Result<Vec<StoredNode>> {
        let mut rows = match node_type {
            Some(t) => {
                self.conn
                    .query(
                        "SELECT id, node_type, parent_id, content_digest, fields_json, updated_at
                         FROM nodes WHERE node_type = ?1 ORDER BY id",
                        params![t],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        "SELECT id, node_type, parent_id, content_digest, fields_json, updated_at
                         FROM nodes ORDER BY id",
                        params![],
                    )
                    .await
            }
        }
        .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_node(&row)?);
        }
        Ok(results)
    }

    /// Field updates published for a node.
    pub async fn get_node_fields(&self, id: &LocalId) -> Result<Map<String, Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT field, value_json FROM node_fields WHERE node_id = ?1 ORDER BY field",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut fields = Map::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let field: String = row.get(0).map_err(db_err)?;
            let raw: String = row.get(1).map_err(db_err)?;
            let value = serde_json::from_str(&raw).map_err(db_err)?;
            fields.insert(field, value);
        }
        Ok(fields)
    }

    async fn node_exists(&self, id: &LocalId) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM nodes WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(db_err)?;
        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    // -----------------------------------------------------------------------
    // Files, schemas, dependencies
    // -----------------------------------------------------------------------

    /// List file artifacts owned by a node.
    pub async fn list_files(&self, owner_id: &LocalId) -> Result<Vec<StoredFile>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_id, name, ext, path, size FROM files
                 WHERE owner_id = ?1 ORDER BY name",
                params![owner_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(StoredFile {
                id: row.get::<String>(0).map_err(db_err)?,
                owner_id: row.get::<String>(1).map_err(db_err)?,
                name: row.get::<String>(2).map_err(db_err)?,
                ext: row.get::<String>(3).map_err(db_err)?,
                path: PathBuf::from(row.get::<String>(4).map_err(db_err)?),
                size: row.get::<i64>(5).map_err(db_err)? as u64,
            });
        }
        Ok(results)
    }

    /// Get a registered schema's SDL by name.
    pub async fn get_schema(&self, name: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT sdl FROM schemas WHERE name = ?1", params![name])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// Node ids the page at `path` depends on.
    pub async fn list_dependencies(&self, path: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT node_id FROM page_dependencies WHERE path = ?1 ORDER BY node_id",
                params![path],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row.get::<String>(0).map_err(db_err)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Ingest runs
    // -----------------------------------------------------------------------

    /// Insert a new ingest run. Returns the generated run ID.
    pub async fn insert_ingest_run(&self, branch: &str) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO ingest_runs (id, branch, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), branch, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Mark an ingest run finished with its stats.
    pub async fn finish_ingest_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE ingest_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// All ingest runs, newest first.
    pub async fn list_ingest_runs(&self) -> Result<Vec<IngestRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, branch, started_at, finished_at, stats_json
                 FROM ingest_runs ORDER BY started_at DESC, id DESC",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let stats = row
                .get::<String>(4)
                .ok()
                .map(|json| serde_json::from_str(&json).map_err(db_err))
                .transpose()?;
            runs.push(IngestRun {
                id: row.get::<String>(0).map_err(db_err)?,
                branch: row.get::<String>(1).map_err(db_err)?,
                started_at: row.get::<String>(2).map_err(db_err)?,
                finished_at: row.get::<String>(3).ok(),
                stats,
            });
        }
        Ok(runs)
    }
}

#[async_trait]
impl NodeSink for NodeStore {
    async fn register_node(&self, node: &LocalNode) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let fields_json = Value::Object(node.fields.clone()).to_string();
        self.conn
            .execute(
                "INSERT INTO nodes (id, node_type, parent_id, content, content_digest, fields_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   node_type = excluded.node_type,
                   parent_id = excluded.parent_id,
                   content = excluded.content,
                   content_digest = excluded.content_digest,
                   fields_json = excluded.fields_json,
                   updated_at = excluded.updated_at",
                params![
                    node.id.to_string(),
                    node.internal.node_type.as_str(),
                    node.parent.map(|p| p.to_string()),
                    node.internal.content.as_str(),
                    node.internal.content_digest.as_str(),
                    fields_json,
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        tracing::debug!(id = %node.id, node_type = %node.internal.node_type, "node registered");
        Ok(())
    }

    async fn update_node_field(
        &self,
        node_id: &LocalId,
        field: &str,
        value: &Value,
    ) -> Result<()> {
        if !self.node_exists(node_id).await? {
            return Err(CmsGraphError::Storage(format!(
                "cannot set field '{field}': node {node_id} is not registered"
            )));
        }
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO node_fields (node_id, field, value_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(node_id, field) DO UPDATE SET
                   value_json = excluded.value_json,
                   updated_at = excluded.updated_at",
                params![node_id.to_string(), field, value.to_string(), now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn materialize_file(&self, file: FileArtifact) -> Result<LocalId> {
        let file_name = file.checked_file_name()?;
        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(&file.buffer);
            format!("{:x}", hasher.finalize())
        };
        let dir = self.files_dir.join(&digest);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CmsGraphError::io(&dir, e))?;
        let path = dir.join(&file_name);
        tokio::fs::write(&path, &file.buffer)
            .await
            .map_err(|e| CmsGraphError::io(&path, e))?;

        let relative_path = format!("{digest}/{file_name}");
        let id = self.mint_id(&format!("file-{relative_path}"));
        let size = file.buffer.len() as u64;

        let mut fields = Map::new();
        fields.insert("name".into(), json!(file.name));
        fields.insert("ext".into(), json!(file.ext));
        fields.insert("base".into(), json!(file_name));
        fields.insert("relativePath".into(), json!(relative_path));
        fields.insert("absolutePath".into(), json!(path.to_string_lossy()));
        fields.insert("size".into(), json!(size));
        let node = LocalNode::new(id, FILE_NODE_TYPE, fields).with_parent(file.owner_id);
        self.register_node(&node).await?;

        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO files (id, owner_id, name, ext, path, size, digest, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   owner_id = excluded.owner_id,
                   path = excluded.path",
                params![
                    id.to_string(),
                    file.owner_id.to_string(),
                    file.name.as_str(),
                    file.ext.as_str(),
                    path.to_string_lossy().to_string(),
                    size as i64,
                    digest.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        tracing::debug!(%id, path = %path.display(), size, "file materialized");
        Ok(id)
    }

    async fn register_schema(&self, name: &str, sdl: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO schemas (name, sdl, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET sdl = excluded.sdl, updated_at = excluded.updated_at",
                params![name, sdl, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn record_dependency(&self, path: &str, node_id: &LocalId) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO page_dependencies (path, node_id) VALUES (?1, ?2)",
                params![path, node_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// Convert a database row to a [`StoredNode`].
fn row_to_node(row: &libsql::Row) -> Result<StoredNode> {
    let fields_json: String = row.get(4).map_err(db_err)?;
    let fields = match serde_json::from_str(&fields_json).map_err(db_err)? {
        Value::Object(map) => map,
        other => {
            return Err(CmsGraphError::Storage(format!(
                "node fields are not an object: {other}"
            )));
        }
    };
    Ok(StoredNode {
        id: row.get::<String>(0).map_err(db_err)?,
        node_type: row.get::<String>(1).map_err(db_err)?,
        parent_id: row.get::<String>(2).ok(),
        content_digest: row.get::<String>(3).map_err(db_err)?,
        fields,
        updated_at: row.get::<String>(5).map_err(db_err)?,
    })
}
