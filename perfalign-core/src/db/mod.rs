//! Metrics database layer for perfalign
//!
//! The on-disk SQLite database aligned windows are written to:
//! - Schema migrations
//! - The [`MetricsSink`] write contract and its SQLite implementation
//! - Query helpers for diagnostics

pub mod metrics;
pub mod schema;

pub use metrics::{
    aggregate, Aggregate, MetricValueRecord, MetricsDatabase, MetricsSink, WindowRecord,
};
