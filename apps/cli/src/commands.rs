//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use cmsgraph_core::{IngestReport, ProgressReporter};
use cmsgraph_remote::CloudCmsClient;
use cmsgraph_schema::{
    GraphQLRequest, QueryBridge, RequestContext, SchemaTransformConfig, TransformedSchema,
};
use cmsgraph_shared::{
    AppConfig, BranchRef, ContentSource, SourceOptions, init_config, load_config,
    load_config_from, resolve_storage_path,
};
use cmsgraph_storage::NodeStore;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// cmsgraph: Cloud CMS content as a local graph.
#[derive(Parser)]
#[command(
    name = "cmsgraph",
    version,
    about = "Ingest a Cloud CMS branch into a local node store and query its namespaced GraphQL schema.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.cmsgraph/cmsgraph.toml).
    #[arg(long, global = true, env = "CMSGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Repository id, overriding `source.repository_id`.
    #[arg(long, global = true)]
    pub repository: Option<String>,

    /// Branch id, overriding `source.branch_id`.
    #[arg(long, global = true)]
    pub branch: Option<String>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Register the remote schema and ingest every document of the branch.
    Source,

    /// Print the namespaced schema as SDL.
    Schema,

    /// Run a query against the namespaced schema.
    Query {
        /// File holding the query, or `-` for stdin.
        file: String,

        /// Variables as a JSON object.
        #[arg(long)]
        variables: Option<String>,

        /// Operation to run when the document holds several.
        #[arg(long)]
        operation: Option<String>,

        /// Page path recorded as depending on the schema.
        #[arg(long, default_value = "/")]
        path: String,
    },

    /// List recorded ingest runs.
    Runs,

    /// List stored nodes.
    Nodes {
        /// Only nodes of this type.
        #[arg(long = "type")]
        node_type: Option<String>,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "cmsgraph=info",
        1 => "cmsgraph=debug",
        _ => "cmsgraph=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Source => cmd_source(&config).await,
        Command::Schema => cmd_schema(&config).await,
        Command::Query {
            file,
            variables,
            operation,
            path,
        } => cmd_query(&config, &file, variables.as_deref(), operation, path).await,
        Command::Runs => cmd_runs(&config).await,
        Command::Nodes { node_type } => cmd_nodes(&config, node_type.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

/// Load the config file and apply flag overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(repository) = &cli.repository {
        config.source.repository_id = repository.clone();
    }
    if let Some(branch) = &cli.branch {
        config.source.branch_id = branch.clone();
    }
    Ok(config)
}

async fn open_store(config: &AppConfig) -> Result<NodeStore> {
    let db_path = resolve_storage_path(&config.storage.database_path)?;
    let files_dir = resolve_storage_path(&config.storage.files_dir)?;
    Ok(NodeStore::open(&db_path, &files_dir).await?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_source(config: &AppConfig) -> Result<()> {
    let options = SourceOptions::from_config(config)?;
    let branch = options.branch();
    let store = open_store(config).await?;
    let client = CloudCmsClient::connect(&options.keys).await?;

    info!(%branch, "sourcing nodes");
    let outcome = source_nodes(&client, &store, config, &options).await;
    client.close();
    let report = outcome?;

    println!();
    println!("  Branch:      {branch}");
    println!("  Pages:       {}", report.pages_fetched);
    println!("  Documents:   {}", report.documents_seen);
    println!("  Nodes:       {}", report.nodes_registered);
    println!("  Attachments: {}", report.attachments_materialized);
    println!("  Failures:    {}", report.failures.len());
    println!("  Time:        {:.1}s", report.duration.as_secs_f64());
    println!();

    for failure in &report.failures {
        match &failure.attachment {
            Some(key) => println!("  ! {} [{key}]: {}", failure.doc_id, failure.message),
            None => println!("  ! {}: {}", failure.doc_id, failure.message),
        }
    }

    if report.has_failures() {
        return Err(eyre!(
            "{} document(s) failed to ingest",
            report.failures.len()
        ));
    }
    Ok(())
}

/// Schema startup plus one recorded ingest run. The run row is closed
/// whether or not ingestion succeeds.
async fn source_nodes(
    source: &dyn ContentSource,
    store: &NodeStore,
    config: &AppConfig,
    options: &SourceOptions,
) -> Result<IngestReport> {
    let branch = options.branch();
    if config.schema.enabled {
        let schema_config = SchemaTransformConfig::from(&config.schema);
        cmsgraph_schema::source_schema(source, store, &branch, &schema_config).await?;
    } else {
        info!("remote schema disabled");
    }

    let run_id = store.insert_ingest_run(&branch.to_string()).await?;
    let reporter = CliProgress::new();
    match cmsgraph_core::ingest_all(source, store, &branch, &options.query(), &reporter).await {
        Ok(report) => {
            store
                .finish_ingest_run(&run_id, &report.stats_json().to_string())
                .await?;
            Ok(report)
        }
        Err(e) => {
            reporter.abandon();
            let stats = json!({"error": e.to_string()});
            if let Err(finish_err) = store.finish_ingest_run(&run_id, &stats.to_string()).await {
                warn!(error = %finish_err, %run_id, "could not close ingest run");
            }
            Err(e.into())
        }
    }
}

async fn cmd_schema(config: &AppConfig) -> Result<()> {
    let options = SourceOptions::from_config(config)?;
    let branch = options.branch();
    let client = CloudCmsClient::connect(&options.keys).await?;

    let remote_sdl = client.introspect_schema(&branch).await;
    client.close();

    let schema_config = SchemaTransformConfig::from(&config.schema);
    let transformed = cmsgraph_schema::transform::transform(&remote_sdl?, &schema_config)?;
    println!("{}", transformed.schema);
    Ok(())
}

async fn cmd_query(
    config: &AppConfig,
    file: &str,
    variables: Option<&str>,
    operation: Option<String>,
    path: String,
) -> Result<()> {
    let query = if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file).map_err(|e| eyre!("cannot read '{file}': {e}"))?
    };
    let variables: Map<String, Value> = match variables {
        Some(raw) => serde_json::from_str(raw).map_err(|e| eyre!("invalid --variables: {e}"))?,
        None => Map::new(),
    };
    let request = GraphQLRequest {
        query,
        operation_name: operation,
        variables,
    };
    let ctx = RequestContext { path };

    let options = SourceOptions::from_config(config)?;
    let store = open_store(config).await?;
    let client = CloudCmsClient::connect(&options.keys).await?;

    let outcome = run_query(&client, &store, config, options.branch(), &request, &ctx).await;
    client.close();
    let response = outcome?;

    if response.get("errors").is_some() {
        warn!("query returned errors");
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Rebuild the namespaced schema and delegate one request. Registration
/// belongs to `source`; dependencies still point at its sentinel node.
async fn run_query(
    client: &CloudCmsClient,
    store: &NodeStore,
    config: &AppConfig,
    branch: BranchRef,
    request: &GraphQLRequest,
    ctx: &RequestContext,
) -> Result<Value> {
    let schema_config = SchemaTransformConfig::from(&config.schema);
    let remote_sdl = client.introspect_schema(&branch).await?;
    let sentinel = cmsgraph_schema::sentinel_id(store, &schema_config.type_name);
    let schema = TransformedSchema::build(&remote_sdl, &schema_config, sentinel)?;

    let bridge = QueryBridge::new(client, branch);
    Ok(schema.execute(&bridge, store, request, ctx).await?)
}

async fn cmd_runs(config: &AppConfig) -> Result<()> {
    let store = open_store(config).await?;
    let runs = store.list_ingest_runs().await?;

    if runs.is_empty() {
        println!("No ingest runs recorded.");
        return Ok(());
    }

    println!();
    println!("  {:<38} {:<24} {:<34} STATS", "ID", "BRANCH", "FINISHED");
    for run in &runs {
        let finished = run.finished_at.as_deref().unwrap_or("(open)");
        let stats = run.stats.as_ref().map(Value::to_string).unwrap_or_default();
        println!("  {:<38} {:<24} {:<34} {stats}", run.id, run.branch, finished);
    }
    println!();
    Ok(())
}

async fn cmd_nodes(config: &AppConfig, node_type: Option<&str>) -> Result<()> {
    let store = open_store(config).await?;
    let nodes = store.list_nodes(node_type).await?;

    if nodes.is_empty() {
        println!("No nodes stored.");
        return Ok(());
    }

    println!();
    println!("  {:<38} {:<24} UPDATED", "ID", "TYPE");
    for node in &nodes {
        println!("  {:<38} {:<24} {}", node.id, node.node_type, node.updated_at);
    }
    println!();
    println!("  {} node(s)", nodes.len());
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    /// Stop the spinner where it is when a run fails part-way.
    fn abandon(&self) {
        self.spinner.abandon();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_fetched(&self, page: usize, size: usize) {
        self.spinner
            .set_message(format!("Fetched page {page} ({size} documents)"));
    }

    fn document_processed(&self, doc_id: &str, current: usize) {
        self.spinner.set_message(format!("[{current}] {doc_id}"));
    }

    fn done(&self, _report: &IngestReport) {
        self.spinner.finish_and_clear();
    }
}
