//! Latest known cluster topology
//!
//! The topology processor is the single writer; the orchestrator and the
//! sink read. Updates publish a whole new [`ClusterTopology`] through an
//! [`ArcSwap`], so a reader either sees the previous list or the next one,
//! never a list being edited.

use crate::types::Millis;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One cluster member as reported by the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDetails {
    #[serde(rename = "NodeId")]
    pub node_id: String,
    #[serde(rename = "HostAddress", default)]
    pub host_address: String,
    #[serde(rename = "Role", default)]
    pub role: String,
    #[serde(rename = "IsClusterManager", default)]
    pub is_cluster_manager: bool,
}

/// Immutable cluster membership observed at `observed_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTopology {
    pub observed_at: Option<Millis>,
    pub nodes: Vec<NodeDetails>,
}

impl ClusterTopology {
    pub fn new(observed_at: Millis, nodes: Vec<NodeDetails>) -> Self {
        Self {
            observed_at: Some(observed_at),
            nodes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The elected cluster manager, if the writer reported one.
    pub fn cluster_manager(&self) -> Option<&NodeDetails> {
        self.nodes.iter().find(|n| n.is_cluster_manager)
    }
}

/// Shared handle to the latest topology.
#[derive(Debug, Clone, Default)]
pub struct TopologyHandle {
    inner: Arc<ArcSwap<ClusterTopology>>,
}

impl TopologyHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current topology.
    pub fn load(&self) -> Arc<ClusterTopology> {
        self.inner.load_full()
    }

    /// Replace the topology unless the stored one is newer.
    ///
    /// Returns `true` when the new value was published.
    pub fn publish(&self, topology: ClusterTopology) -> bool {
        let current = self.inner.load();
        if let (Some(stored), Some(incoming)) = (current.observed_at, topology.observed_at) {
            if stored > incoming {
                return false;
            }
        }
        self.inner.store(Arc::new(topology));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, manager: bool) -> NodeDetails {
        NodeDetails {
            node_id: id.to_string(),
            host_address: format!("10.0.0.{}", id.len()),
            role: "data".to_string(),
            is_cluster_manager: manager,
        }
    }

    #[test]
    fn test_publish_and_load() {
        let handle = TopologyHandle::new();
        assert!(handle.load().is_empty());

        let reader = handle.clone();
        assert!(handle.publish(ClusterTopology::new(100, vec![node("a", true), node("b", false)])));

        let seen = reader.load();
        assert_eq!(seen.nodes.len(), 2);
        assert_eq!(seen.cluster_manager().unwrap().node_id, "a");
    }

    #[test]
    fn test_older_topology_not_published() {
        let handle = TopologyHandle::new();
        handle.publish(ClusterTopology::new(200, vec![node("a", true)]));
        assert!(!handle.publish(ClusterTopology::new(100, vec![])));
        assert_eq!(handle.load().nodes.len(), 1);
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let handle = TopologyHandle::new();
        handle.publish(ClusterTopology::new(1, vec![node("a", false)]));
        let before = handle.load();
        handle.publish(ClusterTopology::new(2, vec![node("a", false), node("b", true)]));
        assert_eq!(before.nodes.len(), 1);
        assert_eq!(handle.load().nodes.len(), 2);
    }

    #[test]
    fn test_node_details_json() {
        let node: NodeDetails = serde_json::from_str(
            r#"{"NodeId":"n1","HostAddress":"10.1.1.1","Role":"data","IsClusterManager":true}"#,
        )
        .unwrap();
        assert_eq!(node.node_id, "n1");
        assert!(node.is_cluster_manager);

        let partial: NodeDetails = serde_json::from_str(r#"{"NodeId":"n2"}"#).unwrap();
        assert_eq!(partial.role, "");
        assert!(!partial.is_cluster_manager);
    }
}
