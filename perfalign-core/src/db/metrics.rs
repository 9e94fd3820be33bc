//! Aggregated metrics database
//!
//! The final destination of every aligned snapshot. Rows are grouped by the
//! category's aggregation dimensions; each metric is stored as
//! sum/avg/min/max plus the number of contributing rows.

use crate::align::AlignedSnapshot;
use crate::catalog::schema;
use crate::error::{Error, Result};
use crate::topology::{ClusterTopology, NodeDetails};
use crate::types::{Category, Millis};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Destination of aligned windows.
pub trait MetricsSink: Send {
    /// Store one category's aligned metrics for the reader window starting at `window_start`.
    fn write_aggregated(
        &self,
        category: Category,
        window_start: Millis,
        aligned: &AlignedSnapshot,
    ) -> Result<usize>;

    /// Store the cluster membership current at `window_start`.
    fn write_topology(&self, window_start: Millis, topology: &ClusterTopology) -> Result<usize>;

    /// Drop every window older than `window_start`.
    fn purge_before(&self, _window_start: Millis) -> Result<usize> {
        Ok(0)
    }
}

/// Summary statistics of one metric within one dimension group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl Aggregate {
    fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        Some(Self {
            sum,
            avg: sum / values.len() as f64,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            count: values.len(),
        })
    }
}

/// One stored metric value.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValueRecord {
    pub window_start: Millis,
    pub category: Category,
    pub metric: String,
    pub dimensions: BTreeMap<String, String>,
    pub aggregate: Aggregate,
}

/// One stored window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRecord {
    pub window_start: Millis,
    pub window_end: Option<Millis>,
    pub written_at: DateTime<Utc>,
}

/// Group an aligned table by the category's aggregation dimensions.
pub fn aggregate(aligned: &AlignedSnapshot) -> Vec<(BTreeMap<String, String>, &'static str, Aggregate)> {
    let s = schema(aligned.category);
    let table = &aligned.table;
    let positions: Vec<(usize, &'static str)> = s
        .aggregate_dimensions
        .iter()
        .filter_map(|d| table.dimensions.iter().position(|x| x == d).map(|i| (i, *d)))
        .collect();

    let mut groups: BTreeMap<BTreeMap<String, String>, Vec<Vec<f64>>> = BTreeMap::new();
    for (key, values) in table.iter() {
        let dims: BTreeMap<String, String> = positions
            .iter()
            .map(|(i, name)| (name.to_string(), key[*i].clone()))
            .collect();
        let samples = groups
            .entry(dims)
            .or_insert_with(|| vec![Vec::new(); table.metrics.len()]);
        for (j, value) in values.iter().enumerate() {
            if let Some(v) = value {
                samples[j].push(*v);
            }
        }
    }

    let mut out = Vec::new();
    for (dims, samples) in groups {
        for (j, metric) in table.metrics.iter().enumerate() {
            if let Some(agg) = Aggregate::of(&samples[j]) {
                out.push((dims.clone(), *metric, agg));
            }
        }
    }
    out
}

/// On-disk SQLite metrics database.
pub struct MetricsDatabase {
    conn: Mutex<Connection>,
}

impl MetricsDatabase {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    fn touch_window(conn: &Connection, window_start: Millis, window_end: Option<Millis>) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO windows (window_start, window_end, written_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(window_start) DO UPDATE SET
                window_end = COALESCE(excluded.window_end, windows.window_end),
                written_at = excluded.written_at
            "#,
            params![window_start, window_end, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ============================================
    // Queries
    // ============================================

    /// Most recent windows, newest first.
    pub fn latest_windows(&self, limit: usize) -> Result<Vec<WindowRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT window_start, window_end, written_at FROM windows ORDER BY window_start DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(window_start, window_end, written_at)| {
                let written_at = DateTime::parse_from_rfc3339(&written_at)
                    .map_err(|e| Error::Config(format!("invalid written_at {:?}: {}", written_at, e)))?
                    .with_timezone(&Utc);
                Ok(WindowRecord {
                    window_start,
                    window_end,
                    written_at,
                })
            })
            .collect()
    }

    /// Stored metric values of one window, optionally for one category.
    pub fn metric_values(
        &self,
        window_start: Millis,
        category: Option<Category>,
    ) -> Result<Vec<MetricValueRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT category, metric, dimensions, sum, avg, min, max, sample_count
            FROM metric_values
            WHERE window_start = ?1 AND (?2 IS NULL OR category = ?2)
            ORDER BY category, metric, dimensions
            "#,
        )?;
        let rows = stmt
            .query_map(params![window_start, category.map(|c| c.as_str())], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    Aggregate {
                        sum: row.get(3)?,
                        avg: row.get(4)?,
                        min: row.get(5)?,
                        max: row.get(6)?,
                        count: row.get::<_, i64>(7)? as usize,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(category, metric, dimensions, aggregate)| {
                Ok(MetricValueRecord {
                    window_start,
                    category: category.parse().map_err(Error::Config)?,
                    metric,
                    dimensions: serde_json::from_str(&dimensions)?,
                    aggregate,
                })
            })
            .collect()
    }

    /// Cluster members recorded for a window.
    pub fn cluster_nodes(&self, window_start: Millis) -> Result<Vec<NodeDetails>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT node_id, host_address, role, is_cluster_manager
            FROM cluster_nodes
            WHERE window_start = ?1
            ORDER BY node_id
            "#,
        )?;
        let nodes = stmt
            .query_map([window_start], |row| {
                Ok(NodeDetails {
                    node_id: row.get(0)?,
                    host_address: row.get(1)?,
                    role: row.get(2)?,
                    is_cluster_manager: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }
}

impl MetricsSink for MetricsDatabase {
    fn write_aggregated(
        &self,
        category: Category,
        window_start: Millis,
        aligned: &AlignedSnapshot,
    ) -> Result<usize> {
        let groups = aggregate(aligned);

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::touch_window(&tx, window_start, Some(aligned.window.end))?;

        // Re-emitting a window replaces it
        tx.execute(
            "DELETE FROM metric_values WHERE window_start = ?1 AND category = ?2",
            params![window_start, category.as_str()],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO metric_values
                    (window_start, category, metric, dimensions, sum, avg, min, max, sample_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for (dims, metric, agg) in &groups {
                stmt.execute(params![
                    window_start,
                    category.as_str(),
                    metric,
                    serde_json::to_string(dims)?,
                    agg.sum,
                    agg.avg,
                    agg.min,
                    agg.max,
                    agg.count as i64,
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(%category, window_start, values = groups.len(), "Wrote aggregated metrics");
        Ok(groups.len())
    }

    fn write_topology(&self, window_start: Millis, topology: &ClusterTopology) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::touch_window(&tx, window_start, None)?;

        tx.execute("DELETE FROM cluster_nodes WHERE window_start = ?1", [window_start])?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO cluster_nodes (window_start, node_id, host_address, role, is_cluster_manager)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(window_start, node_id) DO UPDATE SET
                    host_address = excluded.host_address,
                    role = excluded.role,
                    is_cluster_manager = excluded.is_cluster_manager
                "#,
            )?;
            for node in &topology.nodes {
                stmt.execute(params![
                    window_start,
                    node.node_id,
                    node.host_address,
                    node.role,
                    node.is_cluster_manager as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(topology.nodes.len())
    }

    fn purge_before(&self, window_start: Millis) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM metric_values WHERE window_start < ?1", [window_start])?;
        tx.execute("DELETE FROM cluster_nodes WHERE window_start < ?1", [window_start])?;
        let purged = tx.execute("DELETE FROM windows WHERE window_start < ?1", [window_start])?;
        tx.commit()?;

        if purged > 0 {
            tracing::debug!(purged, before = window_start, "Purged old windows");
        }
        Ok(purged)
    }
}
