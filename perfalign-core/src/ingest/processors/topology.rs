//! Cluster topology
//!
//! The writer dumps the whole membership list into a single `cluster_topology`
//! file, one JSON object per node after the header. Each accepted block
//! replaces the published topology wholesale.

use super::Route;
use crate::catalog::{schema, FieldIndex};
use crate::error::Result;
use crate::ingest::block::{parse_block, ParseError, ParseErrorKind};
use crate::ingest::processor::{EventProcessor, PendingBatch, ProcessOutcome};
use crate::store::{Row, SnapshotStore};
use crate::topology::{ClusterTopology, NodeDetails, TopologyHandle};
use crate::types::{Category, Event, Millis, Window};
use rusqlite::types::Value;

pub struct TopologyProcessor {
    index: FieldIndex,
    batch: PendingBatch,
    handle: TopologyHandle,
}

impl TopologyProcessor {
    pub fn new(handle: TopologyHandle) -> Self {
        Self {
            index: FieldIndex::for_schema(schema(Category::ClusterTopology)),
            batch: PendingBatch::default(),
            handle,
        }
    }

    fn node_row(&self, node: &NodeDetails, current_time: Millis) -> Row {
        let mut values = vec![Value::Null; self.index.width()];
        let mut set = |name: &str, value: Value| {
            if let Some(slot) = self.index.resolve(name) {
                values[slot.column] = value;
            }
        };
        set("NodeId", Value::Text(node.node_id.clone()));
        set("HostAddress", Value::Text(node.host_address.clone()));
        set("Role", Value::Text(node.role.clone()));
        set("IsClusterManager", Value::Integer(node.is_cluster_manager as i64));
        values[self.index.last_updated_column()] = Value::Integer(current_time);
        Row {
            values,
            observed_at: current_time,
        }
    }
}

impl EventProcessor for TopologyProcessor {
    fn category(&self) -> Category {
        Category::ClusterTopology
    }

    fn initialize(&mut self, store: &SnapshotStore, window: Window) -> Result<()> {
        self.batch.reset(window);
        store.get_or_create(Category::ClusterTopology, window.start)?;
        Ok(())
    }

    fn should_handle(&self, event: &Event) -> bool {
        Route::Topology.claims(&event.segments())
    }

    fn process(&mut self, event: &Event) -> ProcessOutcome {
        if let Err(e) = Route::Topology.extract(&event.segments()) {
            return ProcessOutcome::Rejected(e);
        }
        let block = match parse_block(&event.value) {
            Ok(block) => block,
            Err(e) => return ProcessOutcome::Rejected(e),
        };
        if !self.batch.accepts(block.current_time) {
            return ProcessOutcome::Stale {
                current_time: block.current_time,
            };
        }

        let mut nodes = Vec::new();
        for line in block.lines() {
            match serde_json::from_str::<NodeDetails>(line) {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    return ProcessOutcome::Rejected(ParseError::new(
                        ParseErrorKind::BadTopology,
                        format!("{}: {}", line, e),
                    ))
                }
            }
        }

        for node in &nodes {
            let row = self.node_row(node, block.current_time);
            self.batch.push(row);
        }

        let count = nodes.len();
        if self
            .handle
            .publish(ClusterTopology::new(block.current_time, nodes))
        {
            tracing::debug!(nodes = count, observed_at = block.current_time, "Published cluster topology");
        }
        ProcessOutcome::Buffered(count)
    }

    fn pending_rows(&self) -> usize {
        self.batch.len()
    }

    fn commit_batch(&mut self, store: &SnapshotStore) -> Result<usize> {
        self.batch.commit(store, Category::ClusterTopology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = "{\"current_time\":5100}\n\
        {\"NodeId\":\"n1\",\"HostAddress\":\"10.0.0.1\",\"Role\":\"data\",\"IsClusterManager\":false}\n\
        {\"NodeId\":\"n2\",\"HostAddress\":\"10.0.0.2\",\"Role\":\"cluster_manager\",\"IsClusterManager\":true}\n";

    #[test]
    fn test_topology_published_and_stored() {
        let store = SnapshotStore::open_in_memory(5_000).unwrap();
        let handle = TopologyHandle::new();
        let mut processor = TopologyProcessor::new(handle.clone());
        processor.initialize(&store, Window::new(5_000, 10_000)).unwrap();

        let event = Event::new("cluster_topology", BLOCK);
        assert!(processor.should_handle(&event));
        assert_eq!(processor.process(&event), ProcessOutcome::Buffered(2));
        processor.finalize(&store).unwrap();

        let topology = handle.load();
        assert_eq!(topology.observed_at, Some(5_100));
        assert_eq!(topology.cluster_manager().unwrap().node_id, "n2");
        assert_eq!(store.row_count(Category::ClusterTopology, 5_000).unwrap(), 2);
    }

    #[test]
    fn test_malformed_node_rejects_block() {
        let store = SnapshotStore::open_in_memory(5_000).unwrap();
        let handle = TopologyHandle::new();
        let mut processor = TopologyProcessor::new(handle.clone());
        processor.initialize(&store, Window::new(5_000, 10_000)).unwrap();

        let event = Event::new("cluster_topology", "{\"current_time\":5100}\n{\"HostAddress\":1}\n");
        match processor.process(&event) {
            ProcessOutcome::Rejected(e) => assert_eq!(e.kind, ParseErrorKind::BadTopology),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(handle.load().is_empty());
        assert_eq!(processor.pending_rows(), 0);
    }
}
