use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stockwatch_adapters::extract_products;
use stockwatch_sync::{MonitorConfig, RunError, RunOptions};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stockwatch")]
#[command(about = "Watches the Games Island catalog for new and restocked products")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one monitor pass: load state, scrape, diff, notify, save
    Run {
        /// Scrape and diff only; send nothing and keep the stored state
        #[arg(long)]
        dry_run: bool,
    },
    /// Parse a saved listing page and print the extracted products as JSON
    Extract {
        file: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Parses a saved listing page and renders the products as pretty JSON.
fn extract_file(file: &Path, base_url: &str) -> Result<String> {
    let html = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let products = extract_products(&html, base_url)
        .with_context(|| format!("extracting products from {}", file.display()))?;
    serde_json::to_string_pretty(&products).context("serializing products")
}

async fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Run { dry_run } => {
            let summary = stockwatch_sync::run_once_from_env(RunOptions { dry_run }).await?;
            println!(
                "run complete: run_id={} scraped={} new={} restocked={} messages={} saved={}",
                summary.run_id,
                summary.scraped,
                summary.new_products,
                summary.restocked,
                summary.messages_sent,
                summary.state_saved
            );
        }
        Commands::Extract { file } => {
            let config = MonitorConfig::from_env();
            println!("{}", extract_file(&file, &config.base_url)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or(Commands::Run { dry_run: false });
    if let Err(err) = execute(command).await {
        // Pipeline failures are already logged with their stage.
        if err.downcast_ref::<RunError>().is_none() {
            error!(error = %format!("{err:#}"), "stockwatch failed");
        }
        return Err(err);
    }
    Ok(())
}
