//! SQL migration definitions for the cmsgraph node store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: nodes, node_fields, files, schemas, page_dependencies, ingest_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Registered content graph nodes
CREATE TABLE IF NOT EXISTS nodes (
    id             TEXT PRIMARY KEY,
    node_type      TEXT NOT NULL,
    parent_id      TEXT,
    content        TEXT NOT NULL,
    content_digest TEXT NOT NULL,
    fields_json    TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);
CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);

-- Field updates published against existing nodes
CREATE TABLE IF NOT EXISTS node_fields (
    node_id    TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    field      TEXT NOT NULL,
    value_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (node_id, field)
);

-- Materialized file artifacts
CREATE TABLE IF NOT EXISTS files (
    id         TEXT PRIMARY KEY,
    owner_id   TEXT NOT NULL,
    name       TEXT NOT NULL,
    ext        TEXT NOT NULL,
    path       TEXT NOT NULL,
    size       INTEGER NOT NULL,
    digest     TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id);

-- Registered schemas (SDL)
CREATE TABLE IF NOT EXISTS schemas (
    name       TEXT PRIMARY KEY,
    sdl        TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Page -> node dependencies for incremental rebuilds
CREATE TABLE IF NOT EXISTS page_dependencies (
    path    TEXT NOT NULL,
    node_id TEXT NOT NULL,
    PRIMARY KEY (path, node_id)
);

-- Ingestion run history
CREATE TABLE IF NOT EXISTS ingest_runs (
    id          TEXT PRIMARY KEY,
    branch      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
