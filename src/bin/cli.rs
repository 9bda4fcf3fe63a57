//! Crawler CLI
//!
//! Local execution entry point.

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cd_crawler::{
    config,
    error::Result,
    models::{Config, Request},
    pipeline,
    storage::{DocumentStore, LocalStorage},
};

/// Crawl orchestration for package metadata
#[derive(Parser, Debug)]
#[command(name = "crawler", version, about = "Package metadata crawler")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the given entities and everything they lead to
    Crawl {
        /// Request type, e.g. "npm"
        kind: Option<String>,

        /// Entity URLs, e.g. cd:/npm/npmjs/-/left-pad/1.3.0
        urls: Vec<String>,

        /// TOML file of [[requests]] to seed the queue with
        #[arg(long)]
        seeds: Option<PathBuf>,
    },

    /// Validate the configuration file
    Validate,

    /// Show document counts in the local store
    Info,
}

/// Initialize logging based on verbosity flag and configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn seed_requests(
    kind: Option<String>,
    urls: Vec<String>,
    seeds: Option<PathBuf>,
) -> Result<Vec<Request>> {
    let mut requests = match seeds {
        Some(path) => config::load_seeds(&path)?,
        None => Vec::new(),
    };
    if let Some(kind) = kind {
        requests.extend(urls.iter().map(|url| Request::new(kind.as_str(), url.as_str())));
    }
    Ok(requests)
}

async fn show_info(config: &Config) -> Result<()> {
    let storage = &config.storage;
    log::info!("Storage directory: {}", storage.root_dir.display());

    let kinds: BTreeSet<&str> = config.fetchers.iter().map(|f| f.kind.as_str()).collect();
    let local = LocalStorage::new(&storage.root_dir);
    for kind in kinds.into_iter().chain(["attachment", "content"]) {
        let count = local.count(kind).await?.unwrap_or_default();
        log::info!("{}: {} document(s)", kind, count);
    }

    let deadletters = LocalStorage::new(storage.deadletter_path()).named("deadletter");
    let dead = deadletters.count("deadletter").await?.unwrap_or_default();
    log::info!("deadletter: {} document(s)", dead);
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_or_default(&cli.config);
    init_logging(cli.verbose, &config.logging.level);

    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Crawl { kind, urls, seeds } => {
            let requests = seed_requests(kind, urls, seeds)?;
            if requests.is_empty() {
                log::warn!("Nothing to crawl. Pass <type> <url>... or --seeds.");
                return Ok(());
            }
            let summary = pipeline::run_crawler(&config, requests).await?;
            log::info!("Crawl complete! {} request(s) handled", summary.total());
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK ({} fetcher(s))", config.fetchers.len());
        }

        Command::Info => show_info(&config).await?,
    }

    log::info!("Done!");

    Ok(())
}
