//! perfalign-reader - align writer metric buckets into fixed reader windows
//!
//! Reads the per-window bucket directories the writer flushes under the
//! event root, aligns each category onto the reader's fixed grid and writes
//! the aggregated result to the metrics database.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/perfalign/metrics.db (~/.local/share/perfalign/metrics.db)
//! - Logs: $XDG_STATE_HOME/perfalign/perfalign.log (~/.local/state/perfalign/perfalign.log)
//! - Config: $XDG_CONFIG_HOME/perfalign/config.toml (~/.config/perfalign/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use perfalign_core::reader::RunSummary;
use perfalign_core::{
    CategoryOutcome, Config, CycleReport, FileEventSource, MetricsDatabase, MetricsReader,
    SystemClock,
};
use process_lock::acquire_reader_guard;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "perfalign-reader")]
#[command(about = "Align writer metric buckets into fixed reader windows")]
#[command(version)]
struct Args {
    /// Config file (defaults to $XDG_CONFIG_HOME/perfalign/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Event root directory (overrides reader.event_root)
    #[arg(long)]
    event_root: Option<PathBuf>,

    /// Metrics database path (overrides sink.database_path)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Wall-clock time in epoch millis for --once (defaults to now)
    #[arg(long, requires = "once")]
    at: Option<i64>,

    /// Stop after this many cycles
    #[arg(long, conflicts_with = "once")]
    cycles: Option<usize>,

    /// Verbose output (-v per-category outcomes)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    if let Some(root) = &args.event_root {
        config.reader.event_root = root.clone();
    }
    if let Some(db) = &args.database {
        config.sink.database_path = Some(db.clone());
    }
    config.validate().context("invalid configuration")?;

    let _log_guard =
        perfalign_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(
        event_root = %config.reader.event_root.display(),
        interval_ms = config.reader.sampling_interval_ms,
        "perfalign-reader starting"
    );

    let _guard = acquire_reader_guard(&config.reader.event_root)
        .context("failed to acquire process lock")?;

    let db_path = config.metrics_database_path();
    tracing::info!(path = %db_path.display(), "Opening metrics database");
    let db = MetricsDatabase::open(&db_path).context("failed to open metrics database")?;
    db.migrate().context("failed to run database migrations")?;

    let source = FileEventSource::new(&config.reader.event_root);
    let mut reader = MetricsReader::new(config.reader.clone(), Box::new(source), Box::new(db))
        .context("failed to create reader")?
        .with_sink_retention(config.sink.retention_windows);

    println!("Event root: {}", config.reader.event_root.display());
    println!("Database:   {}", db_path.display());

    if args.once {
        let now = args.at.unwrap_or_else(perfalign_core::now_millis);
        let report = reader.run_cycle(now).context("reader cycle failed")?;
        print_cycle_report(&report, args.verbose);
        return Ok(());
    }

    // Set up signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    println!(
        "Reading every {}ms. Press Ctrl+C to stop.",
        config.reader.sampling_interval_ms
    );

    let summary = reader.run_for(&SystemClock, &running, args.cycles);
    print_run_summary(&summary);

    tracing::info!("perfalign-reader stopped");
    Ok(())
}

/// Print one cycle's outcome
fn print_cycle_report(report: &CycleReport, verbose: u8) {
    let (Some(bucket), Some(window)) = (report.bucket, report.reader_window) else {
        println!("\nNo new bucket to read.");
        return;
    };

    let stats = &report.dispatch;
    println!("\nCycle complete:");
    println!("  Bucket:        {}", bucket);
    println!("  Reader window: {}", window);
    println!("  Events:        {}", stats.events);
    println!("  Rows written:  {}", stats.rows_written);
    println!("  Stale blocks:  {}", stats.stale_blocks);
    println!("  Parse errors:  {}", stats.total_parse_errors());
    println!("  Routing gaps:  {}", stats.routing_gaps);
    println!("  Emitted:       {}/{}", report.emitted(), report.outcomes.len());
    println!("  Trimmed:       {}", report.trimmed);

    if verbose >= 1 {
        println!("\nCategories:");
        for (category, outcome) in &report.outcomes {
            match outcome {
                CategoryOutcome::Emitted { rows, values } => {
                    println!("  {:<22} emitted {} rows ({} values)", category.as_str(), rows, values)
                }
                CategoryOutcome::Skipped(reason) => {
                    println!("  {:<22} skipped: {}", category.as_str(), reason)
                }
            }
        }
        if report.topology_nodes > 0 {
            println!("  {:<22} {} nodes", "cluster_topology", report.topology_nodes);
        }
        for (kind, count) in &stats.parse_errors {
            println!("  parse error {}: {}", kind, count);
        }
    }
}

fn print_run_summary(summary: &RunSummary) {
    println!("\nReader stopped:");
    println!("  Cycles:   {}", summary.cycles);
    println!("  Failures: {}", summary.failures);
}
