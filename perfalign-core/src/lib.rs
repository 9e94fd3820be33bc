//! # perfalign-core
//!
//! Core library for perfalign - the reader side of a search-cluster
//! performance metrics pipeline.
//!
//! This library provides:
//! - An event source over the writer's per-window bucket directories
//! - Category processors and an event dispatcher
//! - An in-memory windowed snapshot store with in-flight carry-forward
//! - Temporal alignment of writer snapshots onto the reader's fixed grid
//! - The reader orchestrator loop
//! - An on-disk SQLite metrics database as the final sink
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Raw:** Event files written by the external writer (consumed once)
//! - **Snapshot:** One in-memory table per category and writer window (bounded history)
//! - **Aligned:** Metrics per fixed reader window, aggregated into the metrics database
//!
//! ## Example
//!
//! ```rust,no_run
//! use perfalign_core::{Config, FileEventSource, MetricsDatabase, MetricsReader};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = MetricsDatabase::open(&config.metrics_database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let source = FileEventSource::new(&config.reader.event_root);
//! let mut reader = MetricsReader::new(config.reader.clone(), Box::new(source), Box::new(db))
//!     .expect("invalid reader configuration");
//! let report = reader.run_cycle(perfalign_core::now_millis()).expect("cycle failed");
//! println!("emitted {} categories", report.emitted());
//! ```

// Re-export commonly used items at the crate root
pub use align::{AlignedSnapshot, AlignmentEngine, AlignmentOutcome, MetricTable, SkipReason};
pub use config::Config;
pub use db::{MetricsDatabase, MetricsSink};
pub use error::{Error, Result};
pub use ingest::{DispatchStats, EventDispatcher, EventSource, FileEventSource};
pub use reader::{CategoryOutcome, Clock, CycleReport, MetricsReader, SystemClock};
pub use store::SnapshotStore;
pub use topology::{ClusterTopology, NodeDetails, TopologyHandle};
pub use types::*;

// Public modules
pub mod align;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod reader;
pub mod store;
pub mod topology;
pub mod types;
