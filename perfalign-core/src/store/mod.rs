//! Windowed snapshot store
//!
//! Per category, an ascending map from window start to [`Snapshot`], backed
//! by an in-memory SQLite database with one table per snapshot. The store
//! owns creation, row writes, projection, retention trim and disposal.
//!
//! ```text
//!   os_metrics        ┌─────────┬─────────┬─────────┬─────────┐
//!                     │  w-3i   │  w-2i   │  w-i    │   w     │  ◄── retain_depth = 4
//!                     └─────────┴─────────┴─────────┴─────────┘
//!   shard_operations  ┌─────────┬─────────┬─────────┐
//!                     │  w-2i   │  w-i    │   w     │  ◄── in-flight rows carried →
//!                     └─────────┴─────────┴─────────┘
//! ```
//!
//! All access goes through one mutex, so a diagnostic [`SnapshotStore::inspect`]
//! can never interleave with a trim.

pub mod carry;
mod table;

use crate::align::MetricTable;
use crate::catalog::{schema, END_TIME, START_TIME};
use crate::error::Result;
use crate::types::{Category, Millis};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

pub use carry::{rollover, CarryForward};

/// One category's rows for one writer window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub category: Category,
    pub window_start: Millis,
    /// Backing table in the in-memory database
    pub table: String,
    /// Latest writer timestamp written into this snapshot
    pub writer_end: Option<Millis>,
}

impl Snapshot {
    /// Writer-side end of the window: the cutover time used by alignment.
    ///
    /// Falls back to the bucket end when no row has been written.
    pub fn window_end(&self, interval: Millis) -> Millis {
        self.writer_end.unwrap_or(self.window_start + interval)
    }
}

/// A row ready to be written, laid out in catalog column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
    /// Writer timestamp of the block that produced this row
    pub observed_at: Millis,
}

/// Writer window bounds as seen by the alignment engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterWindow {
    pub window_start: Millis,
    pub end: Millis,
    /// Whether any writer row reached the snapshot. An unobserved window
    /// only carries the default end and cannot serve as a left cutover.
    pub observed: bool,
}

/// Identity and lifecycle fields of a start/finish row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleRow {
    pub key: Vec<String>,
    pub start_time: Option<Millis>,
    pub end_time: Option<Millis>,
}

/// Outcome of a retention trim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimReport {
    /// Window starts removed
    pub removed: Vec<Millis>,
    /// Finish halves dropped without ever seeing their start
    pub orphaned_finishes: usize,
}

/// Row count of one retained snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub category: Category,
    pub window_start: Millis,
    pub writer_end: Option<Millis>,
    pub rows: usize,
}

struct StoreInner {
    conn: Connection,
    series: HashMap<Category, BTreeMap<Millis, Snapshot>>,
}

/// In-memory snapshot store for all categories.
pub struct SnapshotStore {
    interval: Millis,
    inner: Mutex<StoreInner>,
}

impl SnapshotStore {
    /// Open an empty store for windows of `interval` millis.
    pub fn open_in_memory(interval: Millis) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = MEMORY;
            PRAGMA synchronous = OFF;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Ok(Self {
            interval,
            inner: Mutex::new(StoreInner {
                conn,
                series: HashMap::new(),
            }),
        })
    }

    pub fn interval(&self) -> Millis {
        self.interval
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap()
    }

    // ============================================
    // Snapshot lifecycle
    // ============================================

    /// Get the snapshot for a window, creating its table if needed.
    ///
    /// The flag is `true` when the snapshot was created by this call.
    pub fn get_or_create(&self, category: Category, window_start: Millis) -> Result<(Snapshot, bool)> {
        let mut inner = self.lock();
        Self::get_or_create_locked(&mut inner, category, window_start)
    }

    fn get_or_create_locked(
        inner: &mut StoreInner,
        category: Category,
        window_start: Millis,
    ) -> Result<(Snapshot, bool)> {
        if let Some(existing) = inner
            .series
            .get(&category)
            .and_then(|s| s.get(&window_start))
        {
            return Ok((existing.clone(), false));
        }

        let table = table::table_name(category, window_start);
        inner
            .conn
            .execute_batch(&table::create_table_sql(schema(category), &table))?;

        let snapshot = Snapshot {
            category,
            window_start,
            table,
            writer_end: None,
        };
        inner
            .series
            .entry(category)
            .or_default()
            .insert(window_start, snapshot.clone());

        tracing::debug!(%category, window_start, "Created snapshot");
        Ok((snapshot, true))
    }

    pub fn get(&self, category: Category, window_start: Millis) -> Option<Snapshot> {
        self.lock()
            .series
            .get(&category)
            .and_then(|s| s.get(&window_start))
            .cloned()
    }

    /// The closest snapshot strictly before `window_start`.
    pub fn previous(&self, category: Category, window_start: Millis) -> Option<Snapshot> {
        self.lock()
            .series
            .get(&category)
            .and_then(|s| s.range(..window_start).next_back())
            .map(|(_, snap)| snap.clone())
    }

    /// Retained window starts, ascending.
    pub fn window_starts(&self, category: Category) -> Vec<Millis> {
        self.lock()
            .series
            .get(&category)
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of retained snapshots for a category.
    pub fn len(&self, category: Category) -> usize {
        self.lock().series.get(&category).map_or(0, |s| s.len())
    }

    pub fn is_empty(&self, category: Category) -> bool {
        self.len(category) == 0
    }

    /// Writer window bounds of every retained snapshot, ascending.
    pub fn writer_windows(&self, category: Category) -> Vec<WriterWindow> {
        let interval = self.interval;
        self.lock()
            .series
            .get(&category)
            .map(|s| {
                s.values()
                    .map(|snap| WriterWindow {
                        window_start: snap.window_start,
                        end: snap.window_end(interval),
                        observed: snap.writer_end.is_some(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // ============================================
    // Row operations
    // ============================================

    /// Upsert a batch of rows into a snapshot in one transaction.
    ///
    /// Creates the snapshot if it does not exist yet.
    pub fn write_rows(&self, category: Category, window_start: Millis, rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut inner = self.lock();
        let (snapshot, _) = Self::get_or_create_locked(&mut inner, category, window_start)?;
        let sql = table::upsert_sql(schema(category), &snapshot.table);

        let tx = inner.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.values.iter()))?;
            }
        }
        tx.commit()?;

        let newest = rows.iter().map(|r| r.observed_at).max();
        if let Some(snap) = inner
            .series
            .get_mut(&category)
            .and_then(|s| s.get_mut(&window_start))
        {
            snap.writer_end = snap.writer_end.max(newest);
        }

        Ok(rows.len())
    }

    /// Number of rows in a snapshot (0 when the snapshot does not exist).
    pub fn row_count(&self, category: Category, window_start: Millis) -> Result<usize> {
        let inner = self.lock();
        let Some(snapshot) = inner.series.get(&category).and_then(|s| s.get(&window_start)) else {
            return Ok(0);
        };
        let count: i64 = inner.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table::quote(&snapshot.table)),
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Identity and start/end times of every row in a start/finish snapshot.
    pub fn lifecycle_rows(&self, category: Category, window_start: Millis) -> Result<Vec<LifecycleRow>> {
        let s = schema(category);
        if !s.is_start_finish() {
            return Ok(Vec::new());
        }

        let inner = self.lock();
        let Some(snapshot) = inner.series.get(&category).and_then(|m| m.get(&window_start)) else {
            return Ok(Vec::new());
        };

        let key_cols: Vec<String> = s.key_fields.iter().map(|k| table::quote(k)).collect();
        let sql = format!(
            "SELECT {}, {}, {} FROM {} ORDER BY rowid",
            key_cols.join(", "),
            table::quote(START_TIME),
            table::quote(END_TIME),
            table::quote(&snapshot.table)
        );
        let width = key_cols.len();

        let mut stmt = inner.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let mut key = Vec::with_capacity(width);
                for i in 0..width {
                    key.push(row.get::<_, String>(i)?);
                }
                Ok(LifecycleRow {
                    key,
                    start_time: row.get(width)?,
                    end_time: row.get(width + 1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Project a snapshot to one row per dimension key.
    ///
    /// A snapshot that does not exist projects to an empty table.
    pub fn project(&self, category: Category, window_start: Millis) -> Result<MetricTable> {
        let s = schema(category);
        let metrics = s.projected_metrics();
        let mut projected = MetricTable::new(s.projection_dimensions.to_vec(), metrics.clone());

        let inner = self.lock();
        let Some(snapshot) = inner.series.get(&category).and_then(|m| m.get(&window_start)) else {
            return Ok(projected);
        };

        let dims = s.projection_dimensions.len();
        let mut stmt = inner.conn.prepare(&table::projection_sql(s, &snapshot.table))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut key = Vec::with_capacity(dims);
            for i in 0..dims {
                key.push(row.get::<_, String>(i)?);
            }
            let mut values = Vec::with_capacity(metrics.len());
            for j in 0..metrics.len() {
                values.push(row.get::<_, Option<f64>>(dims + j)?);
            }
            projected.insert(key, values);
        }
        Ok(projected)
    }

    // ============================================
    // Retention
    // ============================================

    /// Drop every snapshot of `category` except the `retain_depth` most recent.
    pub fn trim(&self, category: Category, retain_depth: usize) -> Result<TrimReport> {
        let mut guard = self.lock();
        let StoreInner { conn, series } = &mut *guard;

        let Some(snapshots) = series.get_mut(&category) else {
            return Ok(TrimReport::default());
        };
        if snapshots.len() <= retain_depth {
            return Ok(TrimReport::default());
        }

        let excess = snapshots.len() - retain_depth;
        let doomed: Vec<Snapshot> = snapshots.values().take(excess).cloned().collect();
        let start_finish = schema(category).is_start_finish();

        let mut report = TrimReport::default();
        let tx = conn.transaction()?;
        for snapshot in &doomed {
            if start_finish {
                let orphaned: i64 =
                    tx.query_row(&table::orphaned_finish_sql(&snapshot.table), [], |r| r.get(0))?;
                if orphaned > 0 {
                    tracing::info!(
                        %category,
                        window_start = snapshot.window_start,
                        orphaned,
                        "Dropping finish events without a matching start (incomplete trace)"
                    );
                }
                report.orphaned_finishes += orphaned as usize;
            }
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", table::quote(&snapshot.table)))?;
        }
        tx.commit()?;

        for snapshot in doomed {
            snapshots.remove(&snapshot.window_start);
            report.removed.push(snapshot.window_start);
        }

        tracing::debug!(
            %category,
            removed = report.removed.len(),
            retained = snapshots.len(),
            "Trimmed snapshots"
        );
        Ok(report)
    }

    /// Per-snapshot row counts, read inside one transaction.
    pub fn inspect(&self) -> Result<Vec<SnapshotSummary>> {
        let mut guard = self.lock();
        let StoreInner { conn, series } = &mut *guard;

        let tx = conn.transaction()?;
        let mut summaries = Vec::new();
        for (category, snapshots) in series.iter() {
            for snapshot in snapshots.values() {
                let rows: i64 = tx.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table::quote(&snapshot.table)),
                    [],
                    |r| r.get(0),
                )?;
                summaries.push(SnapshotSummary {
                    category: *category,
                    window_start: snapshot.window_start,
                    writer_end: snapshot.writer_end,
                    rows: rows as usize,
                });
            }
        }
        tx.commit()?;

        summaries.sort_by_key(|s| (s.category, s.window_start));
        Ok(summaries)
    }

    /// Run `f` against the connection with the store locked.
    pub(crate) fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut inner = self.lock();
        f(&mut inner.conn)
    }
}
