//! Ingestion layer: from writer bucket files to snapshot rows
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Bucket files   │ ──► │ EventDispatcher  │ ──► │ SnapshotStore   │
//! │ (<root>/<ms>/…) │     │                  │     │ (one table per  │
//! └─────────────────┘     └──────────────────┘     │  window)        │
//!                               │                  └─────────────────┘
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │  EventProcessor      │
//!                    │  ├─ SampledProcessor │
//!                    │  ├─ LifecycleProc…   │
//!                    │  └─ TopologyProc…    │
//!                    └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use perfalign_core::ingest::{EventDispatcher, FileEventSource};
//!
//! let mut dispatcher = EventDispatcher::with_processors(processors, config.batch_flush_rows);
//! let stats = dispatcher.run(&store, &FileEventSource::new(&config.event_root), window)?;
//! println!("{} rows from {} events", stats.rows_written, stats.events);
//! ```

pub mod block;
mod processor;
pub mod processors;
mod source;

pub use block::{ParseError, ParseErrorKind};
pub use processor::{EventProcessor, ProcessOutcome};
pub use source::{EventSource, FileEventSource};

use crate::error::Result;
use crate::store::SnapshotStore;
use crate::types::{Category, Event, Window};
use std::collections::BTreeMap;

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events offered to the dispatcher
    pub events: usize,
    /// Rows committed to the store
    pub rows_written: usize,
    /// Rows committed per category
    pub rows_by_category: BTreeMap<Category, usize>,
    /// Blocks outside the current window
    pub stale_blocks: usize,
    /// Dropped blocks or rows by classification
    pub parse_errors: BTreeMap<ParseErrorKind, usize>,
    /// Events no processor claimed
    pub routing_gaps: usize,
}

impl DispatchStats {
    pub fn total_parse_errors(&self) -> usize {
        self.parse_errors.values().sum()
    }

    fn record_written(&mut self, category: Category, rows: usize) {
        if rows == 0 {
            return;
        }
        self.rows_written += rows;
        *self.rows_by_category.entry(category).or_default() += rows;
    }
}

/// Routes events to category processors and drives their window lifecycle.
pub struct EventDispatcher {
    processors: Vec<Box<dyn EventProcessor>>,
    batch_flush_rows: usize,
    window: Option<Window>,
    stats: DispatchStats,
}

impl EventDispatcher {
    /// Create a dispatcher with no processors.
    pub fn new(batch_flush_rows: usize) -> Self {
        Self::with_processors(Vec::new(), batch_flush_rows)
    }

    /// Create a dispatcher with processors in dispatch order.
    pub fn with_processors(processors: Vec<Box<dyn EventProcessor>>, batch_flush_rows: usize) -> Self {
        Self {
            processors,
            batch_flush_rows: batch_flush_rows.max(1),
            window: None,
            stats: DispatchStats::default(),
        }
    }

    /// Register a processor after those already registered.
    pub fn register(&mut self, processor: Box<dyn EventProcessor>) {
        self.processors.push(processor);
    }

    pub fn categories(&self) -> Vec<Category> {
        self.processors.iter().map(|p| p.category()).collect()
    }

    /// Bind every processor to `window` and reset the counters.
    pub fn initialize_all(&mut self, store: &SnapshotStore, window: Window) -> Result<()> {
        self.window = Some(window);
        self.stats = DispatchStats::default();
        for processor in &mut self.processors {
            processor.initialize(store, window)?;
        }
        Ok(())
    }

    /// Hand an event to the first processor that claims it.
    pub fn dispatch(&mut self, store: &SnapshotStore, event: &Event) -> Result<()> {
        self.stats.events += 1;

        let Some(processor) = self.processors.iter_mut().find(|p| p.should_handle(event)) else {
            self.stats.routing_gaps += 1;
            tracing::warn!(key = %event.key, "No processor for event, dropping");
            return Ok(());
        };

        let category = processor.category();
        match processor.process(event) {
            ProcessOutcome::Buffered(_) => {}
            ProcessOutcome::Stale { current_time } => {
                self.stats.stale_blocks += 1;
                tracing::debug!(
                    %category,
                    key = %event.key,
                    current_time,
                    window = ?self.window,
                    "Stale block dropped"
                );
            }
            ProcessOutcome::Rejected(e) => {
                *self.stats.parse_errors.entry(e.kind).or_default() += 1;
                tracing::warn!(
                    %category,
                    key = %event.key,
                    kind = %e.kind,
                    detail = %e.detail,
                    "Dropping unparsable event"
                );
            }
        }

        if processor.pending_rows() >= self.batch_flush_rows {
            let written = processor.commit_batch(store)?;
            self.stats.record_written(category, written);
        }
        Ok(())
    }

    /// Flush every processor and return the counters for this window.
    pub fn finalize_all(&mut self, store: &SnapshotStore) -> Result<DispatchStats> {
        for processor in &mut self.processors {
            let written = processor.finalize(store)?;
            self.stats.record_written(processor.category(), written);
        }
        Ok(std::mem::take(&mut self.stats))
    }

    /// Initialize, dispatch every event of the window's bucket, finalize.
    pub fn run(
        &mut self,
        store: &SnapshotStore,
        source: &dyn EventSource,
        window: Window,
    ) -> Result<DispatchStats> {
        self.initialize_all(store, window)?;
        for event in source.list(window.start)? {
            self.dispatch(store, &event)?;
        }
        let stats = self.finalize_all(store)?;

        tracing::info!(
            window = %window,
            events = stats.events,
            rows = stats.rows_written,
            stale = stats.stale_blocks,
            parse_errors = stats.total_parse_errors(),
            routing_gaps = stats.routing_gaps,
            "Dispatched bucket"
        );
        Ok(stats)
    }
}
