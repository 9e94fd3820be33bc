//! Temporal alignment of writer snapshots onto reader windows
//!
//! The writer flushes samples whenever it gets around to it, so its window
//! boundaries drift against the reader's fixed grid. For a reader window
//! `[a, b)` the engine finds the two writer snapshots straddling it and
//! blends them by how long each one covered the window:
//!
//! ```text
//!          a            t                 b
//!   ───────┼────────────┼─────────────────┼──────────
//!    left  │◄── t - a ─►│                 │
//!    right │            │◄──── b - t ────►│
//!
//!   value = (L·(t-a) + R·(b-t)) / (b-a)
//! ```
//!
//! `t` is the writer-side end of the left snapshot (see
//! [`Snapshot::window_end`](crate::store::Snapshot::window_end)).

use crate::error::Result;
use crate::store::{SnapshotStore, WriterWindow};
use crate::types::{Category, Millis, Window};
use std::collections::BTreeMap;
use std::fmt;

/// Values of the projection dimensions identifying one row.
pub type DimensionKey = Vec<String>;

/// A projected table: one row of metric values per dimension key.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTable {
    pub dimensions: Vec<&'static str>,
    pub metrics: Vec<&'static str>,
    pub rows: BTreeMap<DimensionKey, Vec<Option<f64>>>,
}

impl MetricTable {
    pub fn new(dimensions: Vec<&'static str>, metrics: Vec<&'static str>) -> Self {
        Self {
            dimensions,
            metrics,
            rows: BTreeMap::new(),
        }
    }

    /// Insert or replace the row for `key`.
    pub fn insert(&mut self, key: DimensionKey, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.metrics.len());
        self.rows.insert(key, values);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn metric_index(&self, metric: &str) -> Option<usize> {
        self.metrics.iter().position(|m| *m == metric)
    }

    /// Value of one metric for one dimension key.
    pub fn value(&self, key: &[&str], metric: &str) -> Option<f64> {
        let idx = self.metric_index(metric)?;
        let key: DimensionKey = key.iter().map(|s| s.to_string()).collect();
        self.rows.get(&key).and_then(|values| values[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DimensionKey, &Vec<Option<f64>>)> {
        self.rows.iter()
    }
}

/// The metrics of one category for one reader window.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSnapshot {
    pub category: Category,
    /// Reader window `[a, b)`
    pub window: Window,
    /// Writer cutover `t` between the left and right snapshots
    pub cutover: Millis,
    pub left_window_start: Millis,
    /// `None` when the left snapshot alone covers the reader window
    pub right_window_start: Option<Millis>,
    pub table: MetricTable,
}

/// Why a category produced no data for a reader window.
///
/// All of these are ordinary while the writer warms up or falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InsufficientHistory { available: usize, required: usize },
    NoSnapshotAfterStart,
    RightNotReady,
    StaleRightSnapshot { right_end: Millis, window_end: Millis },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InsufficientHistory { .. } => "insufficient_history",
            SkipReason::NoSnapshotAfterStart => "no_snapshot_after_start",
            SkipReason::RightNotReady => "right_not_ready",
            SkipReason::StaleRightSnapshot { .. } => "stale_right_snapshot",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientHistory {
                available,
                required,
            } => write!(f, "insufficient history ({} of {} snapshots)", available, required),
            SkipReason::NoSnapshotAfterStart => f.write_str("no snapshot ends after window start"),
            SkipReason::RightNotReady => f.write_str("right snapshot not ready"),
            SkipReason::StaleRightSnapshot {
                right_end,
                window_end,
            } => write!(f, "right snapshot ends at {} before window end {}", right_end, window_end),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentOutcome {
    Aligned(AlignedSnapshot),
    Skipped(SkipReason),
}

/// Snapshots chosen for a reader window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The reader window lies wholly inside the left snapshot's validity.
    Left(WriterWindow),
    Straddle {
        left: WriterWindow,
        right: WriterWindow,
    },
}

/// Picks snapshot pairs and blends them.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentEngine {
    min_depth: usize,
    stale_tolerance: Millis,
}

impl AlignmentEngine {
    pub fn new(min_depth: usize, stale_tolerance: Millis) -> Self {
        Self {
            min_depth,
            stale_tolerance,
        }
    }

    /// Choose left and right snapshots for `window` from ascending writer windows.
    pub fn select(
        &self,
        windows: &[WriterWindow],
        window: Window,
    ) -> std::result::Result<Selection, SkipReason> {
        if windows.len() < self.min_depth {
            return Err(SkipReason::InsufficientHistory {
                available: windows.len(),
                required: self.min_depth,
            });
        }

        let left_idx = windows
            .iter()
            .position(|w| w.observed && w.end >= window.start)
            .ok_or(SkipReason::NoSnapshotAfterStart)?;
        let left = windows[left_idx];

        if left.end > window.end {
            return Ok(Selection::Left(left));
        }

        let right = *windows.get(left_idx + 1).ok_or(SkipReason::RightNotReady)?;
        if right.end + self.stale_tolerance < window.end {
            return Err(SkipReason::StaleRightSnapshot {
                right_end: right.end,
                window_end: window.end,
            });
        }

        Ok(Selection::Straddle { left, right })
    }

    /// Align one category of the store onto `window`.
    pub fn align(
        &self,
        store: &SnapshotStore,
        category: Category,
        window: Window,
    ) -> Result<AlignmentOutcome> {
        let windows = store.writer_windows(category);
        let selection = match self.select(&windows, window) {
            Ok(selection) => selection,
            Err(reason) => return Ok(AlignmentOutcome::Skipped(reason)),
        };

        let aligned = match selection {
            Selection::Left(left) => AlignedSnapshot {
                category,
                window,
                cutover: left.end,
                left_window_start: left.window_start,
                right_window_start: None,
                table: store.project(category, left.window_start)?,
            },
            Selection::Straddle { left, right } => {
                let left_table = store.project(category, left.window_start)?;
                let right_table = store.project(category, right.window_start)?;
                AlignedSnapshot {
                    category,
                    window,
                    cutover: left.end,
                    left_window_start: left.window_start,
                    right_window_start: Some(right.window_start),
                    table: interpolate(&left_table, &right_table, window, left.end),
                }
            }
        };

        tracing::debug!(
            %category,
            window = %window,
            cutover = aligned.cutover,
            rows = aligned.table.len(),
            "Aligned snapshot"
        );
        Ok(AlignmentOutcome::Aligned(aligned))
    }
}

/// Blend two projected tables over `window` with cutover `t`.
///
/// Rows present on one side only pass through unchanged. For rows present
/// on both sides, a metric missing on one side takes the other side's value.
pub fn interpolate(left: &MetricTable, right: &MetricTable, window: Window, cutover: Millis) -> MetricTable {
    let t = cutover.clamp(window.start, window.end);
    let left_weight = (t - window.start) as f64;
    let right_weight = (window.end - t) as f64;
    let total = left_weight + right_weight;

    let mut out = MetricTable::new(left.dimensions.clone(), left.metrics.clone());

    for (key, l) in &left.rows {
        let values = match right.rows.get(key) {
            None => l.clone(),
            Some(r) => l
                .iter()
                .zip(r)
                .map(|(lv, rv)| match (lv, rv) {
                    (Some(lv), Some(rv)) if total > 0.0 => {
                        Some((lv * left_weight + rv * right_weight) / total)
                    }
                    (Some(lv), Some(_)) => Some(*lv),
                    (Some(v), None) | (None, Some(v)) => Some(*v),
                    (None, None) => None,
                })
                .collect(),
        };
        out.rows.insert(key.clone(), values);
    }

    for (key, r) in &right.rows {
        out.rows.entry(key.clone()).or_insert_with(|| r.clone());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{schema, FieldIndex};
    use crate::store::Row;
    use rusqlite::types::Value;

    fn table(rows: &[(&str, Option<f64>)]) -> MetricTable {
        let mut t = MetricTable::new(vec!["ThreadID"], vec!["CPU_Utilization"]);
        for (key, value) in rows {
            t.insert(vec![key.to_string()], vec![*value]);
        }
        t
    }

    fn ww(window_start: Millis, end: Millis) -> WriterWindow {
        WriterWindow {
            window_start,
            end,
            observed: true,
        }
    }

    fn idle(window_start: Millis, interval: Millis) -> WriterWindow {
        WriterWindow {
            window_start,
            end: window_start + interval,
            observed: false,
        }
    }

    #[test]
    fn test_interpolation_weights() {
        let left = table(&[("1", Some(10.0))]);
        let right = table(&[("1", Some(20.0))]);
        let out = interpolate(&left, &right, Window::new(0, 5), 3);
        assert_eq!(out.value(&["1"], "CPU_Utilization"), Some(14.0));
    }

    #[test]
    fn test_one_sided_rows_pass_through() {
        let left = table(&[("1", Some(10.0)), ("2", Some(7.0))]);
        let right = table(&[("1", Some(20.0)), ("3", Some(3.0))]);
        let out = interpolate(&left, &right, Window::new(0, 5), 3);

        assert_eq!(out.len(), 3);
        assert_eq!(out.value(&["2"], "CPU_Utilization"), Some(7.0));
        assert_eq!(out.value(&["3"], "CPU_Utilization"), Some(3.0));
    }

    #[test]
    fn test_null_field_takes_other_side() {
        let left = table(&[("1", None)]);
        let right = table(&[("1", Some(20.0))]);
        let out = interpolate(&left, &right, Window::new(0, 5), 3);
        assert_eq!(out.value(&["1"], "CPU_Utilization"), Some(20.0));

        let out = interpolate(&right, &left, Window::new(0, 5), 3);
        assert_eq!(out.value(&["1"], "CPU_Utilization"), Some(20.0));
    }

    #[test]
    fn test_cutover_at_edges() {
        let left = table(&[("1", Some(10.0))]);
        let right = table(&[("1", Some(20.0))]);
        assert_eq!(
            interpolate(&left, &right, Window::new(0, 5), 0).value(&["1"], "CPU_Utilization"),
            Some(20.0)
        );
        assert_eq!(
            interpolate(&left, &right, Window::new(0, 5), 5).value(&["1"], "CPU_Utilization"),
            Some(10.0)
        );
    }

    #[test]
    fn test_select_requires_history() {
        let engine = AlignmentEngine::new(2, 0);
        let err = engine
            .select(&[ww(5_000, 10_000)], Window::new(8_000, 13_000))
            .unwrap_err();
        assert_eq!(
            err,
            SkipReason::InsufficientHistory {
                available: 1,
                required: 2
            }
        );
    }

    #[test]
    fn test_select_policy() {
        let engine = AlignmentEngine::new(2, 0);
        let windows = [ww(5_000, 10_000), ww(10_000, 15_000)];

        assert_eq!(
            engine.select(&windows, Window::new(8_000, 13_000)),
            Ok(Selection::Straddle {
                left: windows[0],
                right: windows[1]
            })
        );
        assert_eq!(
            engine.select(&windows, Window::new(16_000, 21_000)),
            Err(SkipReason::NoSnapshotAfterStart)
        );
        assert_eq!(
            engine.select(&windows, Window::new(11_000, 16_000)),
            Err(SkipReason::RightNotReady)
        );
        assert_eq!(
            engine.select(&windows, Window::new(3_000, 8_000)),
            Ok(Selection::Left(windows[0]))
        );
    }

    #[test]
    fn test_select_stale_right() {
        let windows = [ww(0, 4_000), ww(5_000, 7_000)];
        let strict = AlignmentEngine::new(2, 0);
        assert_eq!(
            strict.select(&windows, Window::new(2_000, 7_500)),
            Err(SkipReason::StaleRightSnapshot {
                right_end: 7_000,
                window_end: 7_500
            })
        );

        let tolerant = AlignmentEngine::new(2, 500);
        assert!(tolerant.select(&windows, Window::new(2_000, 7_500)).is_ok());
    }

    #[test]
    fn test_select_skips_idle_left() {
        let engine = AlignmentEngine::new(2, 0);
        let windows = [idle(5_000, 5_000), ww(10_000, 12_000), ww(15_000, 16_000)];

        // The idle window's default end touches the reader window start but
        // holds no writer data, so the first real snapshot is the left side.
        assert_eq!(
            engine.select(&windows, Window::new(10_000, 15_000)),
            Ok(Selection::Straddle {
                left: windows[1],
                right: windows[2]
            })
        );
    }

    #[test]
    fn test_select_idle_right_keeps_left_rows() {
        let engine = AlignmentEngine::new(2, 0);
        let windows = [ww(10_000, 12_000), idle(15_000, 5_000)];
        assert_eq!(
            engine.select(&windows, Window::new(10_000, 15_000)),
            Ok(Selection::Straddle {
                left: windows[0],
                right: windows[1]
            })
        );

        let all_idle = [idle(5_000, 5_000), idle(10_000, 5_000)];
        assert_eq!(
            engine.select(&all_idle, Window::new(5_000, 10_000)),
            Err(SkipReason::NoSnapshotAfterStart)
        );
    }

    fn cpu_row(cpu: f64, at: Millis) -> Row {
        let index = FieldIndex::for_schema(schema(Category::OsMetrics));
        let mut values = vec![Value::Null; index.width()];
        values[index.path_column("ThreadID").unwrap()] = Value::Text("1".into());
        values[index.resolve("ThreadName").unwrap().column] = Value::Text("search".into());
        values[index.resolve("CPU_Utilization").unwrap().column] = Value::Real(cpu);
        values[index.last_updated_column()] = Value::Integer(at);
        Row {
            values,
            observed_at: at,
        }
    }

    #[test]
    fn test_align_store_end_to_end() {
        let store = SnapshotStore::open_in_memory(5_000).unwrap();
        store
            .write_rows(Category::OsMetrics, 10_000, &[cpu_row(10.0, 10_000)])
            .unwrap();
        store
            .write_rows(Category::OsMetrics, 15_000, &[cpu_row(20.0, 15_000)])
            .unwrap();

        let engine = AlignmentEngine::new(2, 0);
        let outcome = engine
            .align(&store, Category::OsMetrics, Window::new(8_000, 13_000))
            .unwrap();
        let AlignmentOutcome::Aligned(aligned) = outcome else {
            panic!("expected aligned outcome, got {:?}", outcome);
        };
        assert_eq!(aligned.cutover, 10_000);
        assert_eq!(aligned.right_window_start, Some(15_000));
        assert_eq!(aligned.table.value(&["1", "search"], "CPU_Utilization"), Some(16.0));
    }

    #[test]
    fn test_align_empty_store_skips() {
        let store = SnapshotStore::open_in_memory(5_000).unwrap();
        let engine = AlignmentEngine::new(2, 0);
        let outcome = engine
            .align(&store, Category::NodeMetrics, Window::new(0, 5_000))
            .unwrap();
        assert!(matches!(
            outcome,
            AlignmentOutcome::Skipped(SkipReason::InsufficientHistory { available: 0, .. })
        ));
    }
}
