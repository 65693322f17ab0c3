//! Application configuration for cmsgraph.
//!
//! User config lives at `~/.cmsgraph/cmsgraph.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CmsGraphError, Result};
use crate::types::BranchRef;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "cmsgraph.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".cmsgraph";

/// Environment variable overriding the client secret.
pub const CLIENT_SECRET_ENV: &str = "CMSGRAPH_CLIENT_SECRET";

/// Environment variable overriding the user password.
pub const PASSWORD_ENV: &str = "CMSGRAPH_PASSWORD";

// ---------------------------------------------------------------------------
// Config structs (matching cmsgraph.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which repository/branch to ingest and how to filter it.
    #[serde(default)]
    pub source: SourceConfig,

    /// Remote credentials.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Remote schema namespacing.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Local node store.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Remote repository id.
    #[serde(default)]
    pub repository_id: String,

    /// Remote branch id.
    #[serde(default = "default_branch_id")]
    pub branch_id: String,

    /// Query applied to every page fetch. Absent means match all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_query: Option<Value>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repository_id: String::new(),
            branch_id: default_branch_id(),
            content_query: None,
        }
    }
}

fn default_branch_id() -> String {
    "master".into()
}

/// `[keys]` section. Either inline values or a `keys_file` (gitana.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Path to a `gitana.json` credentials file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            keys_file: None,
            client_key: None,
            client_secret: None,
            username: None,
            password: None,
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.cloudcms.com".into()
}

/// `[schema]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Whether to fetch and register the remote GraphQL schema.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prefix applied to every remote type name.
    #[serde(default = "default_type_name")]
    pub type_name: String,

    /// Field on the host query root under which the remote schema lives.
    #[serde(default = "default_field_name")]
    pub field_name: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            type_name: default_type_name(),
            field_name: default_field_name(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_type_name() -> String {
    "CloudCMS".into()
}
fn default_field_name() -> String {
    "cloudcms".into()
}

/// `[storage]` section. Relative paths resolve against the config dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Directory materialized attachment files are written to.
    #[serde(default = "default_files_dir")]
    pub files_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            files_dir: default_files_dir(),
        }
    }
}

fn default_database_path() -> String {
    "nodes.db".into()
}
fn default_files_dir() -> String {
    "files".into()
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Resolved remote credentials.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub client_key: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "baseURL", default = "default_base_url")]
    pub base_url: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_key", &self.client_key)
            .field("username", &self.username)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl KeysConfig {
    /// Resolve credentials from the keys file or inline values, then apply
    /// environment overrides for the secrets.
    pub fn resolve(&self) -> Result<Credentials> {
        let mut creds = match &self.keys_file {
            Some(path) => load_keys_file(Path::new(path))?,
            None => Credentials {
                client_key: required(&self.client_key, "client_key")?,
                client_secret: self.client_secret.clone().unwrap_or_default(),
                username: required(&self.username, "username")?,
                password: self.password.clone().unwrap_or_default(),
                base_url: self.base_url.clone(),
            },
        };

        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            creds.client_secret = secret;
        }
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            creds.password = password;
        }

        if creds.client_secret.is_empty() {
            return Err(CmsGraphError::config(format!(
                "keys.client_secret is not set (or set {CLIENT_SECRET_ENV})"
            )));
        }
        if creds.password.is_empty() {
            return Err(CmsGraphError::config(format!(
                "keys.password is not set (or set {PASSWORD_ENV})"
            )));
        }
        Ok(creds)
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CmsGraphError::config(format!("keys.{name} is not set")))
}

/// Load credentials from a `gitana.json` file.
pub fn load_keys_file(path: &Path) -> Result<Credentials> {
    let content = std::fs::read_to_string(path).map_err(|e| CmsGraphError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        CmsGraphError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

// ---------------------------------------------------------------------------
// Source options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// The options an ingestion run recognizes.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub keys: Credentials,
    pub content_query: Option<Value>,
    pub repository_id: String,
    pub branch_id: String,
}

impl SourceOptions {
    /// Build runtime options from the file config, resolving credentials.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        if config.source.repository_id.is_empty() {
            return Err(CmsGraphError::config("source.repository_id is not set"));
        }
        Ok(Self {
            keys: config.keys.resolve()?,
            content_query: config.source.content_query.clone(),
            repository_id: config.source.repository_id.clone(),
            branch_id: config.source.branch_id.clone(),
        })
    }

    pub fn branch(&self) -> BranchRef {
        BranchRef::new(&self.repository_id, &self.branch_id)
    }

    /// The query sent with every page request; `{}` when none is configured.
    pub fn query(&self) -> Value {
        self.content_query
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.cmsgraph/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CmsGraphError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.cmsgraph/cmsgraph.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CmsGraphError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CmsGraphError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CmsGraphError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CmsGraphError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CmsGraphError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve a storage path: absolute paths are kept, relative ones are
/// placed under the config directory.
pub fn resolve_storage_path(path: &str) -> Result<PathBuf> {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        Ok(p)
    } else {
        Ok(config_dir()?.join(p))
    }
}
