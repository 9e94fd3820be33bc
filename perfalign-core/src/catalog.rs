//! Per-category field catalog
//!
//! Every category has a fixed, compile-time schema: which dimensions come
//! from the event key path, which `Name:Value` lines of the value block are
//! dimensions or metrics, and which columns identify a row. A
//! [`FieldIndex`] is resolved from the schema once when a processor is
//! built; looking up a name that is not in the schema yields `None` and the
//! line is ignored, which keeps the reader tolerant of newer writers.

use crate::types::Category;
use std::collections::HashMap;

/// Bookkeeping column: writer timestamp of the latest update to a row.
pub const LAST_UPDATED_TIME: &str = "last_updated_time";
/// Bookkeeping column: operation start (start/finish categories).
pub const START_TIME: &str = "start_time";
/// Bookkeeping column: operation end (start/finish categories).
pub const END_TIME: &str = "end_time";

/// Value-block field that sets [`START_TIME`].
pub const START_TIME_FIELD: &str = "StartTime";
/// Value-block field that sets [`END_TIME`].
pub const FINISH_TIME_FIELD: &str = "FinishTime";

/// Projected metric: number of completed operations.
pub const COUNT_METRIC: &str = "Count";
/// Projected metric: mean operation latency in millis.
pub const LATENCY_METRIC: &str = "Latency";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Dimension,
    Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Float,
    Int,
}

impl FieldType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Float => "REAL",
            FieldType::Int => "INTEGER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub role: FieldRole,
    pub ty: FieldType,
}

const fn dim(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        role: FieldRole::Dimension,
        ty: FieldType::Text,
    }
}

const fn float(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        role: FieldRole::Metric,
        ty: FieldType::Float,
    }
}

const fn int(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        role: FieldRole::Metric,
        ty: FieldType::Int,
    }
}

/// How rows of a category come into being.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// One sample per key per window; newest sample wins.
    Sampled,
    /// A start event and a finish event bind to one row.
    StartFinish,
    /// Whole-cluster membership list, replaced on each update.
    Topology,
}

/// Compile-time description of one category.
#[derive(Debug)]
pub struct CategorySchema {
    pub category: Category,
    pub lifecycle: Lifecycle,
    /// Dimensions taken from the event key path, in column order.
    pub path_fields: &'static [&'static str],
    /// Fields carried as `Name:Value` lines in the value block.
    pub fields: &'static [FieldSpec],
    /// Columns forming the row identity (the upsert key).
    pub key_fields: &'static [&'static str],
    /// Dimension key of the projected metric table.
    pub projection_dimensions: &'static [&'static str],
    /// Dimensions the sink groups aligned rows by.
    pub aggregate_dimensions: &'static [&'static str],
}

/// Where a snapshot column's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    Path,
    Block(FieldRole),
    LastUpdated,
    StartTime,
    EndTime,
}

/// One column of a snapshot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: FieldType,
    pub source: ColumnSource,
    pub key: bool,
}

impl CategorySchema {
    pub fn is_start_finish(&self) -> bool {
        self.lifecycle == Lifecycle::StartFinish
    }

    /// Snapshot table columns: path fields, block fields, then bookkeeping.
    pub fn columns(&self) -> Vec<Column> {
        let is_key = |name: &str| self.key_fields.contains(&name);
        let mut columns = Vec::with_capacity(self.path_fields.len() + self.fields.len() + 3);

        for name in self.path_fields {
            columns.push(Column {
                name,
                ty: FieldType::Text,
                source: ColumnSource::Path,
                key: is_key(name),
            });
        }
        for field in self.fields {
            columns.push(Column {
                name: field.name,
                ty: field.ty,
                source: ColumnSource::Block(field.role),
                key: is_key(field.name),
            });
        }
        columns.push(Column {
            name: LAST_UPDATED_TIME,
            ty: FieldType::Int,
            source: ColumnSource::LastUpdated,
            key: false,
        });
        if self.is_start_finish() {
            columns.push(Column {
                name: START_TIME,
                ty: FieldType::Int,
                source: ColumnSource::StartTime,
                key: false,
            });
            columns.push(Column {
                name: END_TIME,
                ty: FieldType::Int,
                source: ColumnSource::EndTime,
                key: false,
            });
        }
        columns
    }

    pub fn metric_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.role == FieldRole::Metric)
    }

    /// Metric columns of the projected table.
    ///
    /// Start/finish categories project to `Count`, `Latency` and the sum of
    /// each metric field over completed operations.
    pub fn projected_metrics(&self) -> Vec<&'static str> {
        let mut metrics = Vec::new();
        if self.is_start_finish() {
            metrics.push(COUNT_METRIC);
            metrics.push(LATENCY_METRIC);
        }
        metrics.extend(self.metric_fields().map(|f| f.name));
        metrics
    }
}

// ============================================
// Schemas
// ============================================

static OS_METRICS: CategorySchema = CategorySchema {
    category: Category::OsMetrics,
    lifecycle: Lifecycle::Sampled,
    path_fields: &["ThreadID"],
    fields: &[
        dim("ThreadName"),
        float("CPU_Utilization"),
        float("Paging_MajfltRate"),
        float("Paging_MinfltRate"),
        float("Paging_RSS"),
        float("Sched_Runtime"),
        float("Sched_Waittime"),
        float("Sched_CtxRate"),
        float("Heap_AllocRate"),
        float("IO_ReadThroughput"),
        float("IO_WriteThroughput"),
        float("IO_TotalSyscallRate"),
        float("Thread_Blocked_Time"),
    ],
    key_fields: &["ThreadID"],
    projection_dimensions: &["ThreadID", "ThreadName"],
    aggregate_dimensions: &[],
};

static SHARD_OPERATIONS: CategorySchema = CategorySchema {
    category: Category::ShardOperations,
    lifecycle: Lifecycle::StartFinish,
    path_fields: &["ThreadID", "Operation", "OperationID"],
    fields: &[
        dim("IndexName"),
        dim("ShardID"),
        dim("Primary"),
        int("DocCount"),
        int("Failed"),
    ],
    key_fields: &["ThreadID", "Operation", "OperationID"],
    projection_dimensions: &["IndexName", "ShardID", "Operation", "Primary"],
    aggregate_dimensions: &["IndexName", "ShardID", "Operation"],
};

static HTTP_REQUESTS: CategorySchema = CategorySchema {
    category: Category::HttpRequests,
    lifecycle: Lifecycle::StartFinish,
    path_fields: &["ThreadID", "Operation", "RequestID"],
    fields: &[
        dim("HTTPRespCode"),
        dim("Exception"),
        int("ItemCount"),
        int("IndicesCount"),
    ],
    key_fields: &["ThreadID", "Operation", "RequestID"],
    projection_dimensions: &["Operation", "HTTPRespCode", "Exception"],
    aggregate_dimensions: &["Operation", "HTTPRespCode"],
};

static CLUSTER_MANAGER_TASKS: CategorySchema = CategorySchema {
    category: Category::ClusterManagerTasks,
    lifecycle: Lifecycle::StartFinish,
    path_fields: &["ThreadID", "InsertOrder"],
    fields: &[dim("TaskType"), dim("TaskPriority"), dim("TaskMetadata")],
    key_fields: &["ThreadID", "InsertOrder"],
    projection_dimensions: &["TaskType", "TaskPriority"],
    aggregate_dimensions: &["TaskType"],
};

static NODE_METRICS: CategorySchema = CategorySchema {
    category: Category::NodeMetrics,
    lifecycle: Lifecycle::Sampled,
    path_fields: &["IndexName", "ShardID"],
    fields: &[
        float("Indexing_ThrottleTime"),
        float("Cache_Query_Hit"),
        float("Cache_Query_Miss"),
        float("Cache_Query_Size"),
        float("Cache_FieldData_Eviction"),
        float("Cache_FieldData_Size"),
        float("Cache_Request_Hit"),
        float("Cache_Request_Miss"),
        float("Refresh_Event"),
        float("Refresh_Time"),
        float("Flush_Event"),
        float("Merge_Event"),
        float("Merge_Time"),
        float("Segments_Total"),
        float("Segments_Memory"),
    ],
    key_fields: &["IndexName", "ShardID"],
    projection_dimensions: &["IndexName", "ShardID"],
    aggregate_dimensions: &["IndexName"],
};

static CLUSTER_TOPOLOGY: CategorySchema = CategorySchema {
    category: Category::ClusterTopology,
    lifecycle: Lifecycle::Topology,
    path_fields: &[],
    fields: &[
        dim("NodeId"),
        dim("HostAddress"),
        dim("Role"),
        int("IsClusterManager"),
    ],
    key_fields: &["NodeId"],
    projection_dimensions: &["NodeId", "HostAddress", "Role"],
    aggregate_dimensions: &[],
};

/// Schema of a category.
pub fn schema(category: Category) -> &'static CategorySchema {
    match category {
        Category::OsMetrics => &OS_METRICS,
        Category::ShardOperations => &SHARD_OPERATIONS,
        Category::HttpRequests => &HTTP_REQUESTS,
        Category::ClusterManagerTasks => &CLUSTER_MANAGER_TASKS,
        Category::NodeMetrics => &NODE_METRICS,
        Category::ClusterTopology => &CLUSTER_TOPOLOGY,
    }
}

// ============================================
// Field index
// ============================================

/// Resolved location of a value-block field in the snapshot row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    pub column: usize,
    pub ty: FieldType,
    pub key: bool,
}

/// Name → column lookup for one category, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct FieldIndex {
    columns: Vec<Column>,
    block: HashMap<&'static str, FieldSlot>,
    path: HashMap<&'static str, usize>,
    last_updated: usize,
    start_time: Option<usize>,
    end_time: Option<usize>,
}

impl FieldIndex {
    pub fn for_schema(schema: &CategorySchema) -> Self {
        let columns = schema.columns();
        let mut block = HashMap::new();
        let mut path = HashMap::new();
        let mut last_updated = 0;
        let mut start_time = None;
        let mut end_time = None;

        for (i, column) in columns.iter().enumerate() {
            let slot = FieldSlot {
                column: i,
                ty: column.ty,
                key: column.key,
            };
            match column.source {
                ColumnSource::Path => {
                    path.insert(column.name, i);
                }
                ColumnSource::Block(_) => {
                    block.insert(column.name, slot);
                }
                ColumnSource::LastUpdated => last_updated = i,
                ColumnSource::StartTime => {
                    start_time = Some(i);
                    block.insert(START_TIME_FIELD, slot);
                }
                ColumnSource::EndTime => {
                    end_time = Some(i);
                    block.insert(FINISH_TIME_FIELD, slot);
                }
            }
        }

        Self {
            columns,
            block,
            path,
            last_updated,
            start_time,
            end_time,
        }
    }

    /// Look up a value-block field. Unknown names resolve to `None`.
    pub fn resolve(&self, name: &str) -> Option<FieldSlot> {
        self.block.get(name).copied()
    }

    /// Column of a key-path dimension.
    pub fn path_column(&self, name: &str) -> Option<usize> {
        self.path.get(name).copied()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn last_updated_column(&self) -> usize {
        self.last_updated
    }

    pub fn start_time_column(&self) -> Option<usize> {
        self.start_time
    }

    pub fn end_time_column(&self) -> Option<usize> {
        self.end_time
    }
}
