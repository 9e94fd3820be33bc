//! Core domain types for perfalign
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One file from a writer bucket: a key path plus a raw value block |
//! | **Category** | A family of metrics sharing one schema (OS threads, HTTP requests, ...) |
//! | **Window** | A half-open `[start, end)` interval in epoch millis |
//! | **Writer window** | The bucket the external writer flushed a sample into |
//! | **Reader window** | The fixed interval the reader reports aligned metrics for |
//! | **Snapshot** | The rows of one category for one writer window |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Epoch milliseconds.
pub type Millis = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis()
}

/// Round `ts` down to a multiple of `interval`.
pub fn align_down(ts: Millis, interval: Millis) -> Millis {
    ts - ts.rem_euclid(interval)
}

// ============================================
// Events
// ============================================

/// A raw event read from the writer's bucket directory.
///
/// The key is the file path relative to the bucket (always `/`-separated),
/// the value is the file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub key: String,
    pub value: String,
}

impl Event {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Key path segments.
    pub fn segments(&self) -> Vec<&str> {
        self.key.split('/').filter(|s| !s.is_empty()).collect()
    }
}

// ============================================
// Windows
// ============================================

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub start: Millis,
    pub end: Millis,
}

impl Window {
    pub fn new(start: Millis, end: Millis) -> Self {
        Self { start, end }
    }

    /// The interval-aligned window that contains `ts`.
    pub fn containing(ts: Millis, interval: Millis) -> Self {
        let start = align_down(ts, interval);
        Self::new(start, start + interval)
    }

    pub fn contains(&self, ts: Millis) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn len(&self) -> Millis {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// The window of equal length immediately before this one.
    pub fn previous(&self) -> Self {
        Self::new(self.start - self.len(), self.start)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================
// Categories
// ============================================

/// Metric category. Each category has exactly one processor and one
/// snapshot series in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Per-thread OS resource usage
    OsMetrics,
    /// Shard-level bulk/query/fetch operations (start/finish pairs)
    ShardOperations,
    /// REST layer requests (start/finish pairs)
    HttpRequests,
    /// Cluster-manager task executions (start/finish pairs)
    ClusterManagerTasks,
    /// Per-shard node statistics
    NodeMetrics,
    /// Cluster membership
    ClusterTopology,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::OsMetrics,
        Category::ShardOperations,
        Category::HttpRequests,
        Category::ClusterManagerTasks,
        Category::NodeMetrics,
        Category::ClusterTopology,
    ];

    /// Categories whose snapshots are aligned and emitted as metric tables.
    pub const METRICS: [Category; 5] = [
        Category::OsMetrics,
        Category::ShardOperations,
        Category::HttpRequests,
        Category::ClusterManagerTasks,
        Category::NodeMetrics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::OsMetrics => "os_metrics",
            Category::ShardOperations => "shard_operations",
            Category::HttpRequests => "http_requests",
            Category::ClusterManagerTasks => "cluster_manager_tasks",
            Category::NodeMetrics => "node_metrics",
            Category::ClusterTopology => "cluster_topology",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::OsMetrics => "OS Metrics",
            Category::ShardOperations => "Shard Operations",
            Category::HttpRequests => "HTTP Requests",
            Category::ClusterManagerTasks => "Cluster Manager Tasks",
            Category::NodeMetrics => "Node Metrics",
            Category::ClusterTopology => "Cluster Topology",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}
