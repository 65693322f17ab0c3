//! cmsgraph CLI: mirror a Cloud CMS branch into a local content graph.
//!
//! Ingests every document of a branch into a local node store and exposes
//! the branch's GraphQL schema under a single namespaced field.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
