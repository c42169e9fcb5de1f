//! Series-Harvest main entry point
//!
//! This is the command-line interface for the Series-Harvest catalog crawler.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use series_harvest::config::{load_config_with_hash, validate, Config};
use series_harvest::state::{DownloadProgress, SeriesCache};
use series_harvest::storage::{load_errors, ProgressStore, DOWNLOAD_PROGRESS, SERIES_CACHE};
use series_harvest::{Coordinator, CrawlMode};
use tracing_subscriber::EnvFilter;

/// Series-Harvest: a resumable catalog crawler
///
/// Collects series from a paginated catalog, downloads their chapter images
/// in order, and later checks finished series for new chapters. Progress is
/// saved after every step, so an interrupted run picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "series-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable series catalog crawler", long_about = None)]
struct Cli {
    /// Operating mode
    #[arg(short, long, value_enum, default_value_t = CrawlMode::Discover)]
    mode: CrawlMode,

    /// Directory for downloaded chapters (overrides the config)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Directory for progress buckets and reports (overrides the config)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// First listing page to collect from (discover mode)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    start_page: u32,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Show the loaded configuration and progress without crawling
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            tracing::info!("Configuration loaded (hash: {})", hash);
            config
        }
        None => Config::default(),
    };

    if let Some(dir) = &cli.output {
        config.output.downloads_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(dir) = &cli.cache_dir {
        config.output.cache_dir = dir.to_string_lossy().into_owned();
    }
    validate(&config).context("invalid configuration")?;

    if cli.dry_run {
        return handle_dry_run(&config, cli.mode);
    }

    handle_crawl(config, cli.mode, cli.start_page).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("series_harvest=info,warn"),
            1 => EnvFilter::new("series_harvest=debug,info"),
            2 => EnvFilter::new("series_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: prints the configuration and the persisted progress
fn handle_dry_run(config: &Config, mode: CrawlMode) -> Result<()> {
    println!("=== Series-Harvest Dry Run ===\n");

    println!("Catalog:");
    println!("  Base URL: {}", config.catalog.base_url);
    println!("  First listing page: {}", config.catalog.listing_url(1));

    println!("\nCrawler:");
    println!(
        "  Max concurrent requests: {}",
        config.crawler.max_concurrent_requests
    );
    println!(
        "  Max requests per host: {}",
        config.crawler.max_requests_per_host
    );
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);
    println!(
        "  Max response size: {} bytes",
        config.crawler.max_response_bytes
    );
    println!("  Max retries: {}", config.retry.max_retries);

    println!("\nOutput:");
    println!("  Downloads: {}", config.output.downloads_dir);
    println!("  Cache: {}", config.output.cache_dir);

    let store = ProgressStore::open(&config.output.cache_dir)?;
    let series: SeriesCache = store.load(SERIES_CACHE, SeriesCache::default());
    let progress: DownloadProgress = store.load(DOWNLOAD_PROGRESS, DownloadProgress::default());
    let errors = load_errors(&store);

    println!("\nProgress:");
    println!("  Cached series: {}", series.len());
    println!("  Completed: {}", progress.completed.len());
    println!("  Pending: {}", progress.pending(&series).len());
    if let Some(current) = &progress.in_progress {
        println!("  In progress: {}", current);
    }
    println!("  Logged errors: {}", errors.len());

    println!("\n✓ Configuration is valid");
    println!("✓ Would run in {} mode", mode);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, mode: CrawlMode, start_page: u32) -> Result<()> {
    let mut coordinator =
        Coordinator::new(config, mode, start_page).context("failed to initialize crawler")?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match coordinator.run_until(shutdown).await {
        Ok(report) => {
            tracing::info!("Run finished ({})", report.finish_reason);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
