//! Start/finish categories: shard operations, HTTP requests, cluster-manager tasks
//!
//! The writer emits one block when an operation starts and another when it
//! finishes. Both halves share the identity taken from the key path, so the
//! snapshot upsert merges them into one row. An operation still running at
//! the end of a window is carried into the next one when that window's
//! snapshot is created.

use super::{build_row, Phase, Route};
use crate::catalog::{schema, CategorySchema, FieldIndex};
use crate::error::Result;
use crate::ingest::block::parse_block;
use crate::ingest::processor::{EventProcessor, PendingBatch, ProcessOutcome};
use crate::store::{rollover, SnapshotStore};
use crate::types::{Category, Event, Millis, Window};
use rusqlite::types::Value;

pub struct LifecycleProcessor {
    route: Route,
    schema: &'static CategorySchema,
    index: FieldIndex,
    batch: PendingBatch,
    max_in_flight_age: Millis,
}

impl LifecycleProcessor {
    fn new(route: Route, max_in_flight_age: Millis) -> Self {
        let schema = schema(route.category());
        Self {
            route,
            schema,
            index: FieldIndex::for_schema(schema),
            batch: PendingBatch::default(),
            max_in_flight_age,
        }
    }

    pub fn shard_operations(max_in_flight_age: Millis) -> Self {
        Self::new(Route::ShardOperation, max_in_flight_age)
    }

    pub fn http_requests(max_in_flight_age: Millis) -> Self {
        Self::new(Route::HttpRequest, max_in_flight_age)
    }

    pub fn cluster_manager_tasks(max_in_flight_age: Millis) -> Self {
        Self::new(Route::ClusterManagerTask, max_in_flight_age)
    }

    fn phase_column(&self, phase: Phase) -> Option<usize> {
        match phase {
            Phase::Start => self.index.start_time_column(),
            Phase::Finish => self.index.end_time_column(),
        }
    }
}

impl EventProcessor for LifecycleProcessor {
    fn category(&self) -> Category {
        self.route.category()
    }

    fn initialize(&mut self, store: &SnapshotStore, window: Window) -> Result<()> {
        self.batch.reset(window);

        let category = self.category();
        let (current, created) = store.get_or_create(category, window.start)?;
        if created {
            if let Some(previous) = store.previous(category, window.start) {
                rollover(store, &previous, &current, self.max_in_flight_age)?;
            }
        }
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

        let mut row = match build_row(self.schema, &self.index, &path, &block) {
            Ok(row) => row,
            Err(e) => return ProcessOutcome::Rejected(e),
        };

        // StartTime / FinishTime default to the block timestamp
        if let Some(column) = path.phase.and_then(|p| self.phase_column(p)) {
            if row.values[column] == Value::Null {
                row.values[column] = Value::Integer(block.current_time);
            }
        }

        self.batch.push(row);
        ProcessOutcome::Buffered(1)
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

    const INTERVAL: Millis = 5_000;

    fn run_window(processor: &mut LifecycleProcessor, store: &SnapshotStore, start: Millis, events: &[Event]) {
        processor
            .initialize(store, Window::new(start, start + INTERVAL))
            .unwrap();
        for event in events {
            assert!(processor.should_handle(event), "{}", event.key);
            assert_eq!(processor.process(event), ProcessOutcome::Buffered(1), "{}", event.key);
        }
        processor.finalize(store).unwrap();
    }

    #[test]
    fn test_start_and_finish_bind_to_one_row() {
        let store = SnapshotStore::open_in_memory(INTERVAL).unwrap();
        let mut processor = LifecycleProcessor::shard_operations(3 * INTERVAL);
        run_window(
            &mut processor,
            &store,
            0,
            &[
                Event::new(
                    "threads/5/shardbulk/77/start",
                    "{\"current_time\":1000}\nIndexName:logs\nShardID:2\nPrimary:true\n",
                ),
                Event::new(
                    "threads/5/shardbulk/77/finish",
                    "{\"current_time\":1400}\nDocCount:120\nFailed:0\n",
                ),
            ],
        );

        let rows = store.lifecycle_rows(Category::ShardOperations, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_time, Some(1_000));
        assert_eq!(rows[0].end_time, Some(1_400));

        let table = store.project(Category::ShardOperations, 0).unwrap();
        let key = ["logs", "2", "shardbulk", "true"];
        assert_eq!(table.value(&key, "Count"), Some(1.0));
        assert_eq!(table.value(&key, "Latency"), Some(400.0));
        assert_eq!(table.value(&key, "DocCount"), Some(120.0));
    }

    #[test]
    fn test_duplicate_start_does_not_duplicate() {
        let store = SnapshotStore::open_in_memory(INTERVAL).unwrap();
        let mut processor = LifecycleProcessor::cluster_manager_tasks(3 * INTERVAL);
        let start = Event::new(
            "threads/1/cluster_manager_task/12/start",
            "{\"current_time\":2000}\nTaskType:create-index\nTaskPriority:URGENT\n",
        );
        run_window(&mut processor, &store, 0, &[start.clone(), start]);
        assert_eq!(store.row_count(Category::ClusterManagerTasks, 0).unwrap(), 1);
    }

    #[test]
    fn test_explicit_start_time_wins() {
        let store = SnapshotStore::open_in_memory(INTERVAL).unwrap();
        let mut processor = LifecycleProcessor::http_requests(3 * INTERVAL);
        run_window(
            &mut processor,
            &store,
            0,
            &[Event::new(
                "threads/2/http/search/r9/start",
                "{\"current_time\":3000}\nStartTime:2500\nIndicesCount:4\n",
            )],
        );
        let rows = store.lifecycle_rows(Category::HttpRequests, 0).unwrap();
        assert_eq!(rows[0].start_time, Some(2_500));
        assert_eq!(rows[0].end_time, None);
    }

    #[test]
    fn test_finish_in_next_window_completes_carried_start() {
        let store = SnapshotStore::open_in_memory(INTERVAL).unwrap();
        let mut processor = LifecycleProcessor::http_requests(3 * INTERVAL);
        run_window(
            &mut processor,
            &store,
            0,
            &[Event::new("threads/2/http/bulk/r1/start", "{\"current_time\":4000}\n")],
        );
        run_window(
            &mut processor,
            &store,
            INTERVAL,
            &[Event::new(
                "threads/2/http/bulk/r1/finish",
                "{\"current_time\":5600}\nHTTPRespCode:200\nItemCount:10\n",
            )],
        );

        let table = store.project(Category::HttpRequests, INTERVAL).unwrap();
        let key = ["bulk", "200", ""];
        assert_eq!(table.value(&key, "Count"), Some(1.0));
        assert_eq!(table.value(&key, "Latency"), Some(1_600.0));
        assert_eq!(table.value(&key, "ItemCount"), Some(10.0));
    }

    #[test]
    fn test_reinitialize_same_window_does_not_carry_twice() {
        let store = SnapshotStore::open_in_memory(INTERVAL).unwrap();
        let mut processor = LifecycleProcessor::http_requests(3 * INTERVAL);
        run_window(
            &mut processor,
            &store,
            0,
            &[Event::new("threads/2/http/bulk/r1/start", "{\"current_time\":4000}\n")],
        );
        run_window(&mut processor, &store, INTERVAL, &[]);
        run_window(&mut processor, &store, INTERVAL, &[]);
        assert_eq!(store.row_count(Category::HttpRequests, INTERVAL).unwrap(), 1);
    }
}
