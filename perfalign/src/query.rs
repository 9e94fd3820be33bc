//! perfalign-query - inspect the aggregated metrics database
//!
//! Read-side diagnostics for what perfalign-reader has written: recent
//! windows, the metric values of one window and the cluster members seen
//! in it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use perfalign_core::db::MetricValueRecord;
use perfalign_core::{Category, Config, MetricsDatabase};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "perfalign-query")]
#[command(about = "Inspect the perfalign metrics database")]
#[command(version)]
struct Args {
    /// Metrics database path (defaults to the configured one)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Output JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the most recent windows
    Windows {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Show metric values of one window
    Metrics {
        /// Window start in epoch millis (defaults to the latest window)
        #[arg(long)]
        window: Option<i64>,

        /// Restrict to one category (e.g. os_metrics)
        #[arg(long)]
        category: Option<Category>,
    },
    /// Show cluster members recorded for one window
    Nodes {
        /// Window start in epoch millis (defaults to the latest window)
        #[arg(long)]
        window: Option<i64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let db_path = match &args.database {
        Some(path) => path.clone(),
        None => Config::load()
            .context("failed to load configuration")?
            .metrics_database_path(),
    };
    if !db_path.exists() {
        anyhow::bail!("no metrics database at {}", db_path.display());
    }

    let db = MetricsDatabase::open(&db_path).context("failed to open metrics database")?;
    db.migrate().context("failed to run database migrations")?;

    match args.command {
        Command::Windows { limit } => show_windows(&db, limit, args.json),
        Command::Metrics { window, category } => {
            let Some(window) = resolve_window(&db, window)? else {
                println!("No windows recorded yet.");
                return Ok(());
            };
            show_metrics(&db, window, category, args.json)
        }
        Command::Nodes { window } => {
            let Some(window) = resolve_window(&db, window)? else {
                println!("No windows recorded yet.");
                return Ok(());
            };
            show_nodes(&db, window, args.json)
        }
    }
}

fn resolve_window(db: &MetricsDatabase, window: Option<i64>) -> Result<Option<i64>> {
    if window.is_some() {
        return Ok(window);
    }
    let latest = db.latest_windows(1).context("failed to query windows")?;
    Ok(latest.first().map(|w| w.window_start))
}

fn show_windows(db: &MetricsDatabase, limit: usize, json: bool) -> Result<()> {
    let windows = db.latest_windows(limit).context("failed to query windows")?;

    if json {
        let out: Vec<_> = windows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "window_start": w.window_start,
                    "window_end": w.window_end,
                    "written_at": w.written_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if windows.is_empty() {
        println!("No windows recorded yet.");
        return Ok(());
    }
    println!(
        "{:<16} {:<16} {:<20} written at",
        "window start", "window end", "start (UTC)"
    );
    for w in &windows {
        let end = w
            .window_end
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:<16} {:<20} {}",
            w.window_start,
            end,
            format_millis(w.window_start),
            w.written_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn show_metrics(db: &MetricsDatabase, window: i64, category: Option<Category>, json: bool) -> Result<()> {
    let values = db
        .metric_values(window, category)
        .context("failed to query metric values")?;

    if json {
        let out: Vec<_> = values.iter().map(metric_json).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Window {} ({} values)", window, values.len());
    let mut current: Option<Category> = None;
    for v in &values {
        if current != Some(v.category) {
            println!("\n{}:", v.category.display_name());
            current = Some(v.category);
        }
        let dims = v
            .dimensions
            .iter()
            .map(|(k, val)| format!("{}={}", k, val))
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "  {:<28} {:<40} sum={:.3} avg={:.3} min={:.3} max={:.3} n={}",
            v.metric,
            if dims.is_empty() { "-".to_string() } else { dims },
            v.aggregate.sum,
            v.aggregate.avg,
            v.aggregate.min,
            v.aggregate.max,
            v.aggregate.count
        );
    }
    Ok(())
}

fn metric_json(v: &MetricValueRecord) -> serde_json::Value {
    serde_json::json!({
        "window_start": v.window_start,
        "category": v.category,
        "metric": v.metric,
        "dimensions": v.dimensions,
        "sum": v.aggregate.sum,
        "avg": v.aggregate.avg,
        "min": v.aggregate.min,
        "max": v.aggregate.max,
        "count": v.aggregate.count,
    })
}

fn show_nodes(db: &MetricsDatabase, window: i64, json: bool) -> Result<()> {
    let nodes = db
        .cluster_nodes(window)
        .context("failed to query cluster nodes")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }

    println!("Window {} ({} nodes)", window, nodes.len());
    for node in &nodes {
        let manager = if node.is_cluster_manager { " *" } else { "" };
        println!(
            "  {:<24} {:<18} {}{}",
            node.node_id, node.host_address, node.role, manager
        );
    }
    Ok(())
}
