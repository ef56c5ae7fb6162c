//! Catalog Harvester main entry point
//!
//! This is the command-line interface for the concurrent catalog harvester.

use anyhow::Context;
use catalog_harvester::config::{load_config_with_hash, Config};
use catalog_harvester::fanout::{serve, FanOut, ProcessLauncher, WorkerSettings};
use catalog_harvester::output::{
    export_json, load_statistics, print_fanout_summary, print_harvest_summary, print_statistics,
};
use catalog_harvester::pipeline::{collect_work_items, Harvester, Writer};
use catalog_harvester::storage::{open_storage, RunStatus, SqliteStore, WriterReport};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Catalog Harvester: a concurrent catalog scraping pipeline
///
/// Discovers items across the categories of a paginated catalog, enriches
/// each one from its detail page and stores the resulting records.
#[derive(Parser, Debug)]
#[command(name = "catalog-harvester")]
#[command(version)]
#[command(about = "A concurrent catalog scraping pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the thread-parallel pipeline into the database
    Run,

    /// Enrich discovered items across worker processes and export them as JSON
    Fanout {
        /// Also write the collected records to the database
        #[arg(long)]
        store: bool,
    },

    /// Process one chunk read from stdin (spawned by `fanout`)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        worker_id: usize,
    },

    /// Validate config and show what would be harvested
    DryRun,

    /// Show statistics from the database
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::debug!("Configuration loaded (hash: {})", config_hash);

    match cli.command {
        Command::Run => handle_run(&config, &config_hash).await,
        Command::Fanout { store } => handle_fanout(&config, &config_hash, &cli.config, store).await,
        Command::Worker { worker_id } => handle_worker(&config, worker_id).await,
        Command::DryRun => handle_dry_run(&config),
        Command::Stats => handle_stats(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr; stdout carries results and the worker protocol.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_harvester=info,warn"),
            1 => EnvFilter::new("catalog_harvester=debug,info"),
            2 => EnvFilter::new("catalog_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Cancels the returned token on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, cancelling harvest");
            trigger.cancel();
        }
    });

    token
}

fn open_database(config: &Config) -> anyhow::Result<SqliteStore> {
    let path = Path::new(&config.output.database_path);
    open_storage(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Handles `run`: discovery, detail workers and writer in one process
async fn handle_run(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    let store = open_database(config)?;
    let run_id = store.create_run(config_hash, "run")?;
    tracing::info!("Starting run {} against {}", run_id, config.source.base_url);

    let cancel = cancel_on_ctrl_c();
    let harvester = Harvester::from_config(config, cancel)?;

    match harvester.run(store.clone()).await {
        Ok(summary) => {
            let status = if summary.cancelled {
                RunStatus::Interrupted
            } else {
                RunStatus::Completed
            };
            store.finish_run(run_id, status, &summary.writer)?;
            print_harvest_summary(&summary);
            Ok(())
        }
        Err(e) => {
            store.finish_run(run_id, RunStatus::Failed, &WriterReport::default())?;
            Err(e).context("Harvest failed")
        }
    }
}

/// Handles `fanout`: discovery, then enrichment across child processes
async fn handle_fanout(
    config: &Config,
    config_hash: &str,
    config_path: &Path,
    store_records: bool,
) -> anyhow::Result<()> {
    let cancel = cancel_on_ctrl_c();
    let harvester = Harvester::from_config(config, cancel.clone())?;

    let (items, discovery) =
        collect_work_items(harvester.discovery(), config.workers.work_queue_capacity)
            .await
            .context("Discovery failed")?;
    tracing::info!(
        "Discovered {} items in {} subcategories",
        items.len(),
        discovery.subcategories
    );

    let launcher = ProcessLauncher::current_exe(config_path)?;
    let fanout = FanOut::new(Duration::from_secs(config.workers.join_grace_secs))
        .with_channel_capacity(config.workers.persist_queue_capacity);
    let report = fanout.run(items, config.workers.fanout, &launcher).await?;

    let export_path = Path::new(&config.output.export_path);
    export_json(&report.records, export_path)
        .with_context(|| format!("Failed to export {}", export_path.display()))?;
    print_fanout_summary(&report);

    if store_records {
        let store = open_database(config)?;
        let run_id = store.create_run(config_hash, "fanout")?;
        let records = report.records;

        let writer = Writer::new(store.clone());
        let (_, written) =
            tokio::task::spawn_blocking(move || writer.write_all(&records)).await?;

        let status = if cancel.is_cancelled() {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        store.finish_run(run_id, status, &written)?;
        println!(
            "\nStored: {} inserted, {} already stored, {} faults",
            written.inserted, written.already_existed, written.faults
        );
    }

    Ok(())
}

/// Handles `worker`: reads a chunk on stdin, writes messages on stdout
async fn handle_worker(config: &Config, worker_id: usize) -> anyhow::Result<()> {
    let cancel = cancel_on_ctrl_c();
    let harvester = Harvester::from_config(config, cancel.clone())?;

    serve(
        worker_id,
        harvester.stage(),
        WorkerSettings::from_config(&config.workers),
        cancel,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
    .with_context(|| format!("Worker {} failed", worker_id))?;

    Ok(())
}

/// Handles `dry-run`: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Catalog Harvester Dry Run ===\n");

    println!("Source:");
    println!("  Base URL: {}", config.source.base_url);
    match &config.source.page_template {
        Some(template) => println!("  Pagination: template {}", template),
        None => println!("  Pagination: ?{}=<n>", config.source.page_param),
    }
    println!("  Max pages per listing: {}", config.source.max_pages);

    println!("\nFetch:");
    println!("  Max attempts: {}", config.fetch.max_attempts);
    println!(
        "  Retry delay: {}s ({:?})",
        config.fetch.retry_delay_secs, config.fetch.backoff
    );
    println!("  Timeout: {}s", config.fetch.timeout_secs);
    println!("  User agent: {}", config.fetch.user_agent);

    println!("\nWorkers:");
    println!("  Discovery: {}", config.workers.discovery);
    println!("  Detail: {}", config.workers.detail_workers());
    println!("  Fan-out processes: {}", config.workers.fanout);
    println!(
        "  Queue capacities: work {}, persist {}",
        config.workers.work_queue_capacity, config.workers.persist_queue_capacity
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Export: {}", config.output.export_path);

    println!("\nDetail Fields ({}):", config.selectors.fields.len());
    for field in &config.selectors.fields {
        match &field.attr {
            Some(attr) => println!("  - {} ({} @{})", field.name, field.selector, attr),
            None => println!("  - {} ({})", field.name, field.selector),
        }
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles `stats`: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_database(config)?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}
