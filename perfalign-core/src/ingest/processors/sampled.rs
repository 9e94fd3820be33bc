//! Sampled categories: per-thread OS metrics and per-shard node metrics
//!
//! One block per key per flush. Repeated samples for the same key within a
//! window collapse into one row; the newest sample wins.

use super::{build_row, Route};
use crate::catalog::{schema, CategorySchema, FieldIndex};
use crate::error::Result;
use crate::ingest::block::parse_block;
use crate::ingest::processor::{EventProcessor, PendingBatch, ProcessOutcome};
use crate::store::SnapshotStore;
use crate::types::{Category, Event, Window};

pub struct SampledProcessor {
    route: Route,
    schema: &'static CategorySchema,
    index: FieldIndex,
    batch: PendingBatch,
}

impl SampledProcessor {
    fn new(route: Route) -> Self {
        let schema = schema(route.category());
        Self {
            route,
            schema,
            index: FieldIndex::for_schema(schema),
            batch: PendingBatch::default(),
        }
    }

    pub fn os_metrics() -> Self {
        Self::new(Route::OsThread)
    }

    pub fn node_metrics() -> Self {
        Self::new(Route::NodeShard)
    }
}

impl EventProcessor for SampledProcessor {
    fn category(&self) -> Category {
        self.route.category()
    }

    fn initialize(&mut self, store: &SnapshotStore, window: Window) -> Result<()> {
        self.batch.reset(window);
        store.get_or_create(self.category(), window.start)?;
        Ok(())
    }

    fn should_handle(&self, event: &Event) -> bool {
        self.route.claims(&event.segments())
    }

    fn process(&mut self, event: &Event) -> ProcessOutcome {
        let segments = event.segments();
        let path = match self.route.extract(&segments) {
            Ok(path) => path,
            Err(e) => return ProcessOutcome::Rejected(e),
        };
        let block = match parse_block(&event.value) {
            Ok(block) => block,
            Err(e) => return ProcessOutcome::Rejected(e),
        };
        if !self.batch.accepts(block.current_time) {
            return ProcessOutcome::Stale {
                current_time: block.current_time,
            };
        }

        match build_row(self.schema, &self.index, &path, &block) {
            Ok(row) => {
                self.batch.push(row);
                ProcessOutcome::Buffered(1)
            }
            Err(e) => ProcessOutcome::Rejected(e),
        }
    }

    fn pending_rows(&self) -> usize {
        self.batch.len()
    }

    fn commit_batch(&mut self, store: &SnapshotStore) -> Result<usize> {
        self.batch.commit(store, self.category())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::block::ParseErrorKind;

    fn init(processor: &mut SampledProcessor, store: &SnapshotStore) {
        processor.initialize(store, Window::new(5_000, 10_000)).unwrap();
    }

    #[test]
    fn test_os_metrics_row() {
        let store = SnapshotStore::open_in_memory(5_000).unwrap();
        let mut processor = SampledProcessor::os_metrics();
        init(&mut processor, &store);

        let event = Event::new(
            "threads/42/os_metrics",
            "{\"current_time\":6000}\nThreadName:write[T#1]\nCPU_Utilization:0.75\nFutureMetric:9\n",
        );
        assert!(processor.should_handle(&event));
        assert_eq!(processor.process(&event), ProcessOutcome::Buffered(1));
        assert_eq!(processor.pending_rows(), 1);
        assert_eq!(processor.finalize(&store).unwrap(), 1);
        assert_eq!(processor.pending_rows(), 0);

        let table = store.project(Category::OsMetrics, 5_000).unwrap();
        assert_eq!(table.value(&["42", "write[T#1]"], "CPU_Utilization"), Some(0.75));
    }

    #[test]
    fn test_stale_block() {
        let store = SnapshotStore::open_in_memory(5_000).unwrap();
        let mut processor = SampledProcessor::node_metrics();
        init(&mut processor, &store);

        let event = Event::new("indices/logs/0", "{\"current_time\":10000}\nRefresh_Event:3\n");
        assert_eq!(
            processor.process(&event),
            ProcessOutcome::Stale {
                current_time: 10_000
            }
        );
        assert_eq!(processor.pending_rows(), 0);
    }

    #[test]
    fn test_bad_number_drops_row() {
        let store = SnapshotStore::open_in_memory(5_000).unwrap();
        let mut processor = SampledProcessor::node_metrics();
        init(&mut processor, &store);

        let event = Event::new("indices/logs/0", "{\"current_time\":5500}\nRefresh_Event:lots\n");
        match processor.process(&event) {
            ProcessOutcome::Rejected(e) => assert_eq!(e.kind, ParseErrorKind::BadNumber),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_initialize_creates_snapshot() {
        let store = SnapshotStore::open_in_memory(5_000).unwrap();
        let mut processor = SampledProcessor::node_metrics();
        init(&mut processor, &store);
        assert!(store.get(Category::NodeMetrics, 5_000).is_some());
        assert!(!processor.should_handle(&Event::new("threads/1/os_metrics", "")));
    }
}
