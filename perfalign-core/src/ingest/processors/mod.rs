//! Category-specific processors
//!
//! | Category | Processor | Key path |
//! |----------|-----------|----------|
//! | `os_metrics` | [`SampledProcessor`] | `threads/<tid>/os_metrics` |
//! | `shard_operations` | [`LifecycleProcessor`] | `threads/<tid>/shard{bulk,query,fetch}/<opid>/{start,finish}` |
//! | `http_requests` | [`LifecycleProcessor`] | `threads/<tid>/http/<operation>/<rid>/{start,finish}` |
//! | `cluster_manager_tasks` | [`LifecycleProcessor`] | `threads/<tid>/cluster_manager_task/<order>/{start,finish}` |
//! | `node_metrics` | [`SampledProcessor`] | `indices/<index>/<shard>` |
//! | `cluster_topology` | [`TopologyProcessor`] | `cluster_topology` |

mod lifecycle;
mod sampled;
mod topology;

pub use lifecycle::LifecycleProcessor;
pub use sampled::SampledProcessor;
pub use topology::TopologyProcessor;

use super::block::{typed_value, ParseError, ParseErrorKind, ValueBlock};
use super::EventProcessor;
use crate::catalog::{CategorySchema, FieldIndex};
use crate::config::ReaderConfig;
use crate::store::Row;
use crate::topology::TopologyHandle;
use crate::types::Category;
use rusqlite::types::Value;

const SHARD_OPERATION_KINDS: [&str; 3] = ["shardbulk", "shardquery", "shardfetch"];

/// Which half of a start/finish pair an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Finish,
}

impl Phase {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "start" => Some(Phase::Start),
            "finish" => Some(Phase::Finish),
            _ => None,
        }
    }
}

/// Dimension values taken from a key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch<'a> {
    /// Values of the category's path fields, in catalog order
    pub values: Vec<&'a str>,
    pub phase: Option<Phase>,
}

/// Key-path shape of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    OsThread,
    ShardOperation,
    HttpRequest,
    ClusterManagerTask,
    NodeShard,
    Topology,
}

impl Route {
    pub fn category(&self) -> Category {
        match self {
            Route::OsThread => Category::OsMetrics,
            Route::ShardOperation => Category::ShardOperations,
            Route::HttpRequest => Category::HttpRequests,
            Route::ClusterManagerTask => Category::ClusterManagerTasks,
            Route::NodeShard => Category::NodeMetrics,
            Route::Topology => Category::ClusterTopology,
        }
    }

    /// Whether a key path belongs to this route's category.
    ///
    /// Only the leading segments are checked; a claimed path with the wrong
    /// shape is rejected later as `bad_path` instead of being reported as a
    /// routing gap.
    pub fn claims(&self, segments: &[&str]) -> bool {
        let thread_kind = match segments {
            ["threads", _, kind, ..] => Some(*kind),
            _ => None,
        };
        match self {
            Route::OsThread => thread_kind == Some("os_metrics"),
            Route::ShardOperation => thread_kind.is_some_and(|k| SHARD_OPERATION_KINDS.contains(&k)),
            Route::HttpRequest => thread_kind == Some("http"),
            Route::ClusterManagerTask => thread_kind == Some("cluster_manager_task"),
            Route::NodeShard => segments.first() == Some(&"indices"),
            Route::Topology => segments.first() == Some(&"cluster_topology"),
        }
    }

    /// Extract path dimensions from a claimed key path.
    pub fn extract<'a>(&self, segments: &[&'a str]) -> Result<PathMatch<'a>, ParseError> {
        let matched = match (self, segments) {
            (Route::OsThread, ["threads", tid, "os_metrics"]) => Some((vec![*tid], None)),
            (Route::ShardOperation, ["threads", tid, kind, opid, phase]) => {
                Phase::from_segment(phase).map(|p| (vec![*tid, *kind, *opid], Some(p)))
            }
            (Route::HttpRequest, ["threads", tid, "http", operation, rid, phase]) => {
                Phase::from_segment(phase).map(|p| (vec![*tid, *operation, *rid], Some(p)))
            }
            (Route::ClusterManagerTask, ["threads", tid, "cluster_manager_task", order, phase]) => {
                Phase::from_segment(phase).map(|p| (vec![*tid, *order], Some(p)))
            }
            (Route::NodeShard, ["indices", index, shard]) => Some((vec![*index, *shard], None)),
            (Route::Topology, ["cluster_topology"]) => Some((Vec::new(), None)),
            _ => None,
        };

        matched
            .map(|(values, phase)| PathMatch { values, phase })
            .ok_or_else(|| {
                ParseError::new(
                    ParseErrorKind::BadPath,
                    format!("{}: unexpected key path {}", self.category(), segments.join("/")),
                )
            })
    }
}

/// Build a snapshot row from path dimensions and a value block.
///
/// Unknown field names are ignored. A field that fails to convert rejects
/// the whole row.
pub(crate) fn build_row(
    schema: &CategorySchema,
    index: &FieldIndex,
    path: &PathMatch<'_>,
    block: &ValueBlock<'_>,
) -> Result<Row, ParseError> {
    let mut values = vec![Value::Null; index.width()];

    for (name, value) in schema.path_fields.iter().zip(&path.values) {
        if let Some(column) = index.path_column(name) {
            values[column] = Value::Text(value.to_string());
        }
    }

    for (name, raw) in block.fields() {
        if let Some(slot) = index.resolve(name) {
            values[slot.column] = typed_value(name, slot.ty, raw)?;
        }
    }

    values[index.last_updated_column()] = Value::Integer(block.current_time);
    Ok(Row {
        values,
        observed_at: block.current_time,
    })
}

/// Create processors for every category, in dispatch order.
pub fn create_all_processors(
    config: &ReaderConfig,
    topology: TopologyHandle,
) -> Vec<Box<dyn EventProcessor>> {
    let max_age = config.max_in_flight_age();
    vec![
        Box::new(SampledProcessor::os_metrics()),
        Box::new(LifecycleProcessor::shard_operations(max_age)),
        Box::new(LifecycleProcessor::http_requests(max_age)),
        Box::new(LifecycleProcessor::cluster_manager_tasks(max_age)),
        Box::new(SampledProcessor::node_metrics()),
        Box::new(TopologyProcessor::new(topology)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(key: &str) -> Vec<&str> {
        key.split('/').collect()
    }

    #[test]
    fn test_create_all_processors_covers_categories() {
        let processors = create_all_processors(&ReaderConfig::default(), TopologyHandle::new());
        let categories: Vec<Category> = processors.iter().map(|p| p.category()).collect();
        assert_eq!(categories, Category::ALL.to_vec());
    }

    #[test]
    fn test_routes_claim_their_paths() {
        let cases = [
            ("threads/1/os_metrics", Route::OsThread),
            ("threads/1/shardbulk/9/start", Route::ShardOperation),
            ("threads/1/http/search/r1/finish", Route::HttpRequest),
            ("threads/1/cluster_manager_task/4/start", Route::ClusterManagerTask),
            ("indices/logs/0", Route::NodeShard),
            ("cluster_topology", Route::Topology),
        ];
        let routes = [
            Route::OsThread,
            Route::ShardOperation,
            Route::HttpRequest,
            Route::ClusterManagerTask,
            Route::NodeShard,
            Route::Topology,
        ];

        for (key, expected) in cases {
            let segments = segs(key);
            let claimed: Vec<Route> = routes.iter().copied().filter(|r| r.claims(&segments)).collect();
            assert_eq!(claimed, vec![expected], "{}", key);
            assert!(expected.extract(&segments).is_ok(), "{}", key);
        }
        assert!(routes.iter().all(|r| !r.claims(&segs("threads/1/gc_metrics"))));
    }

    #[test]
    fn test_extract_path_values() {
        let m = Route::HttpRequest
            .extract(&segs("threads/7/http/bulk/req-3/start"))
            .unwrap();
        assert_eq!(m.values, vec!["7", "bulk", "req-3"]);
        assert_eq!(m.phase, Some(Phase::Start));

        let m = Route::ShardOperation
            .extract(&segs("threads/7/shardquery/11/finish"))
            .unwrap();
        assert_eq!(m.values, vec!["7", "shardquery", "11"]);
        assert_eq!(m.phase, Some(Phase::Finish));
    }

    #[test]
    fn test_bad_paths() {
        let err = Route::OsThread.extract(&segs("threads/1/os_metrics/extra")).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::BadPath);
        let err = Route::ClusterManagerTask
            .extract(&segs("threads/1/cluster_manager_task/4/middle"))
            .unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::BadPath);
    }
}
