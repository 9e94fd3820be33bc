//! Reader orchestrator
//!
//! One cycle per sampling interval:
//!
//! ```text
//!   PICK_WINDOW ─► DISPATCH ─► ALIGN_AND_EMIT ─► TRIM ─► SLEEP
//!        │                                                  │
//!        └──────────────── idle if no new bucket ◄──────────┘
//! ```
//!
//! The bucket is picked `writer_lag_windows` intervals behind wall-clock
//! time so the writer has finished flushing it. After bucket `w` is
//! dispatched, reader window `[w - interval, w)` is aligned and emitted for
//! every metric category. Trim always runs after emission so alignment
//! never reads a snapshot that is being dropped.

use crate::align::{AlignmentEngine, AlignmentOutcome, SkipReason};
use crate::config::ReaderConfig;
use crate::db::MetricsSink;
use crate::error::Result;
use crate::ingest::processors::create_all_processors;
use crate::ingest::{DispatchStats, EventDispatcher, EventSource};
use crate::logging::OPERATOR_TARGET;
use crate::store::SnapshotStore;
use crate::topology::TopologyHandle;
use crate::types::{align_down, now_millis, Category, Millis, Window};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Consecutive failed cycles before an operator escalation.
pub const ESCALATION_THRESHOLD: u32 = 3;

/// Longest uninterrupted sleep, so shutdown is noticed promptly.
const SLEEP_SLICE: Millis = 100;

/// Time source for the reader loop.
pub trait Clock {
    fn now(&self) -> Millis;
    fn sleep(&self, millis: Millis);
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Millis {
        now_millis()
    }

    fn sleep(&self, millis: Millis) {
        if millis > 0 {
            std::thread::sleep(Duration::from_millis(millis as u64));
        }
    }
}

/// What happened to one category in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryOutcome {
    /// Metric values written to the sink
    Emitted { rows: usize, values: usize },
    Skipped(SkipReason),
}

/// Result of one reader cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Bucket dispatched; `None` for an idle cycle
    pub bucket: Option<Millis>,
    /// Reader window aligned and emitted
    pub reader_window: Option<Window>,
    pub dispatch: DispatchStats,
    pub outcomes: Vec<(Category, CategoryOutcome)>,
    /// Cluster members written for the window
    pub topology_nodes: usize,
    /// Snapshots dropped by retention trim
    pub trimmed: usize,
    /// Finish events dropped without a start
    pub orphaned_finishes: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.bucket.is_none()
    }

    pub fn emitted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CategoryOutcome::Emitted { .. }))
            .count()
    }

    pub fn outcome(&self, category: Category) -> Option<&CategoryOutcome> {
        self.outcomes
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, o)| o)
    }
}

/// Totals of a finished run loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub failures: usize,
}

/// Drives the event source, store, alignment engine and sink.
pub struct MetricsReader {
    config: ReaderConfig,
    source: Box<dyn EventSource>,
    sink: Box<dyn MetricsSink>,
    store: SnapshotStore,
    dispatcher: EventDispatcher,
    engine: AlignmentEngine,
    topology: TopologyHandle,
    sink_retention: Option<Millis>,
    last_bucket: Option<Millis>,
    consecutive_failures: u32,
}

impl MetricsReader {
    /// Build a reader with the default processors for every category.
    pub fn new(
        config: ReaderConfig,
        source: Box<dyn EventSource>,
        sink: Box<dyn MetricsSink>,
    ) -> Result<Self> {
        config.validate()?;

        let store = SnapshotStore::open_in_memory(config.interval())?;
        let topology = TopologyHandle::new();
        let dispatcher = EventDispatcher::with_processors(
            create_all_processors(&config, topology.clone()),
            config.batch_flush_rows,
        );
        let engine = AlignmentEngine::new(config.min_alignment_depth, config.stale_tolerance());

        Ok(Self {
            config,
            source,
            sink,
            store,
            dispatcher,
            engine,
            topology,
            sink_retention: None,
            last_bucket: None,
            consecutive_failures: 0,
        })
    }

    /// Purge sink windows older than `windows` intervals after each cycle.
    pub fn with_sink_retention(mut self, windows: u64) -> Self {
        self.sink_retention = Some(windows as Millis * self.config.interval());
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn topology(&self) -> &TopologyHandle {
        &self.topology
    }

    pub fn last_bucket(&self) -> Option<Millis> {
        self.last_bucket
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// The bucket to dispatch at `now`, or `None` if it was already processed.
    pub fn pick_bucket(&self, now: Millis) -> Option<Millis> {
        let interval = self.config.interval();
        let bucket = align_down(now - self.config.writer_lag(), interval);
        match self.last_bucket {
            Some(last) if bucket <= last => None,
            _ => Some(bucket),
        }
    }

    /// Run one cycle at time `now`.
    pub fn run_cycle(&mut self, now: Millis) -> Result<CycleReport> {
        let Some(bucket) = self.pick_bucket(now) else {
            tracing::trace!(now, last_bucket = ?self.last_bucket, "No new bucket, idle cycle");
            return Ok(CycleReport::default());
        };

        let interval = self.config.interval();
        let bucket_window = Window::new(bucket, bucket + interval);
        let dispatch = self
            .dispatcher
            .run(&self.store, self.source.as_ref(), bucket_window)?;
        self.last_bucket = Some(bucket);

        let reader_window = bucket_window.previous();
        let mut report = CycleReport {
            bucket: Some(bucket),
            reader_window: Some(reader_window),
            dispatch,
            ..Default::default()
        };

        for category in Category::METRICS {
            let outcome = match self.engine.align(&self.store, category, reader_window)? {
                AlignmentOutcome::Aligned(aligned) => {
                    let values = self
                        .sink
                        .write_aggregated(category, reader_window.start, &aligned)?;
                    CategoryOutcome::Emitted {
                        rows: aligned.table.len(),
                        values,
                    }
                }
                AlignmentOutcome::Skipped(reason) => {
                    tracing::debug!(%category, window = %reader_window, %reason, "Alignment skipped");
                    CategoryOutcome::Skipped(reason)
                }
            };
            report.outcomes.push((category, outcome));
        }

        let topology = self.topology.load();
        if !topology.is_empty() {
            report.topology_nodes = self.sink.write_topology(reader_window.start, &topology)?;
        }

        for category in Category::ALL {
            let trim = self.store.trim(category, self.config.retain_depth)?;
            report.trimmed += trim.removed.len();
            report.orphaned_finishes += trim.orphaned_finishes;
        }

        if let Some(retention) = self.sink_retention {
            self.sink.purge_before(reader_window.start - retention)?;
        }

        tracing::info!(
            bucket,
            window = %reader_window,
            emitted = report.emitted(),
            rows = report.dispatch.rows_written,
            trimmed = report.trimmed,
            "Reader cycle complete"
        );
        Ok(report)
    }

    /// Run one cycle and track consecutive failures.
    ///
    /// Errors are logged, never returned: the next cycle starts fresh.
    pub fn step(&mut self, now: Millis) -> Option<CycleReport> {
        match self.run_cycle(now) {
            Ok(report) => {
                self.consecutive_failures = 0;
                Some(report)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    error = %e,
                    failures = self.consecutive_failures,
                    "Reader cycle failed"
                );
                if self.consecutive_failures % ESCALATION_THRESHOLD == 0 {
                    tracing::error!(
                        target: OPERATOR_TARGET,
                        error = %e,
                        failures = self.consecutive_failures,
                        "Reader cycles failing repeatedly"
                    );
                }
                None
            }
        }
    }

    /// Cycle until `running` is cleared.
    pub fn run(&mut self, clock: &dyn Clock, running: &AtomicBool) -> RunSummary {
        self.run_for(clock, running, None)
    }

    /// Cycle until `running` is cleared or `max_cycles` cycles have run.
    pub fn run_for(
        &mut self,
        clock: &dyn Clock,
        running: &AtomicBool,
        max_cycles: Option<usize>,
    ) -> RunSummary {
        let cadence = self.config.interval();
        let mut summary = RunSummary::default();

        while running.load(Ordering::SeqCst) {
            let started = clock.now();
            if self.step(started).is_none() {
                summary.failures += 1;
            }
            summary.cycles += 1;

            if max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }

            let remaining = cadence - (clock.now() - started);
            if remaining <= 0 {
                tracing::warn!(overrun_ms = -remaining, "Reader cycle overran its cadence");
                continue;
            }
            sleep_while_running(clock, running, remaining);
        }

        tracing::info!(cycles = summary.cycles, failures = summary.failures, "Reader stopped");
        summary
    }
}

fn sleep_while_running(clock: &dyn Clock, running: &AtomicBool, millis: Millis) {
    let mut left = millis;
    while left > 0 && running.load(Ordering::SeqCst) {
        let slice = left.min(SLEEP_SLICE);
        clock.sleep(slice);
        left -= slice;
    }
}
