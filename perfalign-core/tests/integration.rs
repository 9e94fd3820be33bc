//! Integration tests for the reader pipeline
//!
//! These tests write bucket directories the way the writer does, then run
//! reader cycles end to end into an on-disk metrics database.

use perfalign_core::db::MetricsDatabase;
use perfalign_core::reader::CategoryOutcome;
use perfalign_core::{
    Category, FileEventSource, Millis, MetricsReader, SkipReason, Window,
};
use perfalign_core::config::ReaderConfig;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const INTERVAL: Millis = 5_000;

/// Write one event file under `<root>/<bucket>/<key>`.
fn write_event(root: &Path, bucket: Millis, key: &str, value: &str) {
    let path = root.join(bucket.to_string()).join(key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, value).unwrap();
}

fn block(current_time: Millis, fields: &[(&str, &str)]) -> String {
    let mut out = format!("{{\"current_time\":{}}}\n", current_time);
    for (name, value) in fields {
        out.push_str(&format!("{}:{}\n", name, value));
    }
    out
}

fn reader_config(root: &Path) -> ReaderConfig {
    ReaderConfig {
        event_root: root.to_path_buf(),
        sampling_interval_ms: INTERVAL as u64,
        writer_lag_windows: 1,
        ..Default::default()
    }
}

/// Sink that shares a database the test can query afterwards.
struct SharedDb(Arc<MetricsDatabase>);

impl perfalign_core::MetricsSink for SharedDb {
    fn write_aggregated(
        &self,
        category: Category,
        window_start: Millis,
        aligned: &perfalign_core::AlignedSnapshot,
    ) -> perfalign_core::Result<usize> {
        self.0.write_aggregated(category, window_start, aligned)
    }

    fn write_topology(
        &self,
        window_start: Millis,
        topology: &perfalign_core::ClusterTopology,
    ) -> perfalign_core::Result<usize> {
        self.0.write_topology(window_start, topology)
    }

    fn purge_before(&self, window_start: Millis) -> perfalign_core::Result<usize> {
        self.0.purge_before(window_start)
    }
}

fn setup() -> (TempDir, Arc<MetricsDatabase>, MetricsReader) {
    let temp = TempDir::new().unwrap();
    let events = temp.path().join("events");
    fs::create_dir_all(&events).unwrap();

    let db = Arc::new(MetricsDatabase::open(&temp.path().join("metrics.db")).unwrap());
    db.migrate().unwrap();

    let reader = MetricsReader::new(
        reader_config(&events),
        Box::new(FileEventSource::new(&events)),
        Box::new(SharedDb(db.clone())),
    )
    .unwrap();
    (temp, db, reader)
}

// ============================================
// End-to-end alignment
// ============================================

#[test]
fn test_os_metrics_interpolated_into_database() {
    let (temp, db, mut reader) = setup();
    let events = temp.path().join("events");

    write_event(
        &events,
        10_000,
        "threads/7/os_metrics",
        &block(12_000, &[("ThreadName", "search"), ("CPU_Utilization", "10")]),
    );
    write_event(
        &events,
        15_000,
        "threads/7/os_metrics",
        &block(16_000, &[("ThreadName", "search"), ("CPU_Utilization", "20")]),
    );

    let first = reader.run_cycle(15_000).unwrap();
    assert!(matches!(
        first.outcome(Category::OsMetrics),
        Some(CategoryOutcome::Skipped(SkipReason::InsufficientHistory { .. }))
    ));
    assert!(db.latest_windows(10).unwrap().is_empty());

    let second = reader.run_cycle(20_000).unwrap();
    assert_eq!(second.reader_window, Some(Window::new(10_000, 15_000)));

    let values = db
        .metric_values(10_000, Some(Category::OsMetrics))
        .unwrap();
    let cpu = values
        .iter()
        .find(|v| v.metric == "CPU_Utilization")
        .expect("cpu value stored");
    assert_eq!(cpu.aggregate.sum, 16.0);
    assert_eq!(cpu.aggregate.count, 1);
    assert!(cpu.dimensions.is_empty());
}

#[test]
fn test_operations_completed_across_windows() {
    let (temp, db, mut reader) = setup();
    let events = temp.path().join("events");

    write_event(
        &events,
        10_000,
        "threads/3/http/search/r1/start",
        &block(13_000, &[("IndicesCount", "2")]),
    );
    write_event(
        &events,
        15_000,
        "threads/3/http/search/r1/finish",
        &block(15_500, &[("HTTPRespCode", "200"), ("ItemCount", "5")]),
    );
    // Half-written file from the writer: ignored
    write_event(&events, 15_000, "threads/3/http/search/r2/start.tmp", "{");

    reader.run_cycle(15_000).unwrap();
    let report = reader.run_cycle(20_000).unwrap();
    assert_eq!(report.dispatch.rows_written, 1);

    // The completed request lives in the 15000 snapshot; the 10000 snapshot
    // still holds only the unfinished start, so the window emits it as a
    // right-only row.
    let values = db
        .metric_values(10_000, Some(Category::HttpRequests))
        .unwrap();
    let count = values.iter().find(|v| v.metric == "Count").unwrap();
    assert_eq!(count.aggregate.sum, 1.0);
    assert_eq!(count.dimensions["Operation"], "search");
    assert_eq!(count.dimensions["HTTPRespCode"], "200");

    let latency = values.iter().find(|v| v.metric == "Latency").unwrap();
    assert_eq!(latency.aggregate.avg, 2_500.0);
}

#[test]
fn test_unparsable_and_unrouted_events_are_counted() {
    let (temp, _db, mut reader) = setup();
    let events = temp.path().join("events");

    write_event(&events, 10_000, "threads/1/os_metrics", "not a header");
    write_event(&events, 10_000, "threads/1/unknown_kind", &block(10_100, &[]));
    write_event(
        &events,
        10_000,
        "indices/logs/0",
        &block(10_100, &[("Refresh_Event", "x")]),
    );
    write_event(&events, 10_000, "indices/logs/1", &block(2_000, &[]));

    let report = reader.run_cycle(15_000).unwrap();
    assert_eq!(report.dispatch.events, 4);
    assert_eq!(report.dispatch.rows_written, 0);
    assert_eq!(report.dispatch.routing_gaps, 1);
    assert_eq!(report.dispatch.stale_blocks, 1);
    assert_eq!(report.dispatch.total_parse_errors(), 2);
}

#[test]
fn test_undecodable_file_does_not_fail_cycle() {
    let (temp, db, mut reader) = setup();
    let events = temp.path().join("events");

    write_event(
        &events,
        10_000,
        "threads/7/os_metrics",
        &block(12_000, &[("ThreadName", "search"), ("CPU_Utilization", "10")]),
    );
    let bad = events.join("10000/indices/logs/0");
    fs::create_dir_all(bad.parent().unwrap()).unwrap();
    fs::write(&bad, b"\xff\xfe").unwrap();
    write_event(
        &events,
        15_000,
        "threads/7/os_metrics",
        &block(16_000, &[("ThreadName", "search"), ("CPU_Utilization", "20")]),
    );

    let first = reader.run_cycle(15_000).unwrap();
    assert_eq!(first.dispatch.events, 1);
    reader.run_cycle(20_000).unwrap();

    let values = db
        .metric_values(10_000, Some(Category::OsMetrics))
        .unwrap();
    let cpu = values.iter().find(|v| v.metric == "CPU_Utilization").unwrap();
    assert_eq!(cpu.aggregate.sum, 16.0);
}

#[test]
fn test_idle_writer_window_before_data() {
    let (temp, db, mut reader) = setup();
    let events = temp.path().join("events");

    // Nothing was written for bucket 5000
    write_event(
        &events,
        10_000,
        "threads/7/os_metrics",
        &block(12_000, &[("ThreadName", "search"), ("CPU_Utilization", "10")]),
    );
    write_event(
        &events,
        15_000,
        "threads/7/os_metrics",
        &block(16_000, &[("ThreadName", "search"), ("CPU_Utilization", "20")]),
    );

    reader.run_cycle(10_000).unwrap();
    reader.run_cycle(15_000).unwrap();
    let report = reader.run_cycle(20_000).unwrap();
    assert!(matches!(
        report.outcome(Category::OsMetrics),
        Some(CategoryOutcome::Emitted { .. })
    ));

    let values = db
        .metric_values(10_000, Some(Category::OsMetrics))
        .unwrap();
    let cpu = values.iter().find(|v| v.metric == "CPU_Utilization").unwrap();
    assert_eq!(cpu.aggregate.sum, 16.0);
}

#[test]
fn test_topology_recorded_per_window() {
    let (temp, db, mut reader) = setup();
    let events = temp.path().join("events");

    write_event(
        &events,
        10_000,
        "cluster_topology",
        "{\"current_time\":10200}\n\
         {\"NodeId\":\"a\",\"HostAddress\":\"10.0.0.1\",\"Role\":\"data\",\"IsClusterManager\":false}\n\
         {\"NodeId\":\"b\",\"HostAddress\":\"10.0.0.2\",\"Role\":\"cluster_manager\",\"IsClusterManager\":true}\n",
    );

    reader.run_cycle(15_000).unwrap();
    reader.run_cycle(20_000).unwrap();

    // Latest topology is written for every window after it was observed
    for window_start in [5_000, 10_000] {
        let nodes = db.cluster_nodes(window_start).unwrap();
        assert_eq!(nodes.len(), 2, "window {}", window_start);
        assert!(nodes.iter().any(|n| n.node_id == "b" && n.is_cluster_manager));
    }
}

#[test]
fn test_retained_history_is_bounded() {
    let (_temp, _db, mut reader) = setup();
    for i in 0..10 {
        reader.run_cycle(15_000 + i * INTERVAL).unwrap();
    }

    let summaries = reader.store().inspect().unwrap();
    for category in Category::ALL {
        let retained = summaries.iter().filter(|s| s.category == category).count();
        assert_eq!(retained, 4, "{}", category);
    }
}
