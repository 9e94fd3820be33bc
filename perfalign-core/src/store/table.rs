//! SQL generation for snapshot tables
//!
//! Table shapes are derived from the category catalog, so every statement
//! here is built from `&'static` schema names plus the store-generated
//! table name. Identifiers are always quoted.

use crate::catalog::{CategorySchema, Lifecycle, END_TIME, LAST_UPDATED_TIME, START_TIME};
use crate::types::{Category, Millis};

pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn table_name(category: Category, window_start: Millis) -> String {
    format!("{}_{}", category.as_str(), window_start)
}

fn column_list(schema: &CategorySchema) -> String {
    schema
        .columns()
        .iter()
        .map(|c| quote(c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn key_list(schema: &CategorySchema) -> String {
    schema
        .key_fields
        .iter()
        .map(|k| quote(k))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn create_table_sql(schema: &CategorySchema, table: &str) -> String {
    let mut defs: Vec<String> = schema
        .columns()
        .iter()
        .map(|c| {
            let not_null = if c.key || c.name == LAST_UPDATED_TIME {
                " NOT NULL"
            } else {
                ""
            };
            format!("{} {}{}", quote(c.name), c.ty.sql_type(), not_null)
        })
        .collect();
    defs.push(format!("UNIQUE({})", key_list(schema)));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote(table),
        defs.join(",\n    ")
    )
}

/// Insert-or-update keyed by the category's identity columns.
///
/// Sampled and topology rows are replaced wholesale by a newer sample.
/// Start/finish rows merge: a column absent (NULL) in the incoming half
/// keeps the stored value, so a start and a finish coalesce into one row.
pub(crate) fn upsert_sql(schema: &CategorySchema, table: &str) -> String {
    let columns = schema.columns();
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let target = quote(table);

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !c.key)
        .map(|c| {
            let col = quote(c.name);
            match schema.lifecycle {
                Lifecycle::StartFinish if c.name == LAST_UPDATED_TIME => format!(
                    "{col} = MAX(excluded.{col}, {target}.{col})",
                    col = col,
                    target = target
                ),
                Lifecycle::StartFinish => format!(
                    "{col} = COALESCE(excluded.{col}, {target}.{col})",
                    col = col,
                    target = target
                ),
                Lifecycle::Sampled | Lifecycle::Topology => {
                    format!("{col} = excluded.{col}", col = col)
                }
            }
        })
        .collect();

    let guard = match schema.lifecycle {
        Lifecycle::StartFinish => String::new(),
        Lifecycle::Sampled | Lifecycle::Topology => format!(
            "\nWHERE excluded.{col} >= {target}.{col}",
            col = quote(LAST_UPDATED_TIME),
            target = target
        ),
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({})\nON CONFLICT({}) DO UPDATE SET {}{}",
        target,
        column_list(schema),
        placeholders,
        key_list(schema),
        updates.join(", "),
        guard
    )
}

/// Projection of a snapshot to one row per dimension key.
///
/// Result columns: projection dimensions, then `projected_metrics()`.
pub(crate) fn projection_sql(schema: &CategorySchema, table: &str) -> String {
    let dims: Vec<String> = schema
        .projection_dimensions
        .iter()
        .map(|d| format!("COALESCE({}, '')", quote(d)))
        .collect();

    match schema.lifecycle {
        Lifecycle::StartFinish => {
            let start = quote(START_TIME);
            let end = quote(END_TIME);
            let mut select = dims.clone();
            select.push("COUNT(*)".to_string());
            select.push(format!("AVG({} - {})", end, start));
            select.extend(schema.metric_fields().map(|f| format!("SUM({})", quote(f.name))));
            format!(
                "SELECT {} FROM {} WHERE {} IS NOT NULL AND {} IS NOT NULL GROUP BY {}",
                select.join(", "),
                quote(table),
                start,
                end,
                dims.join(", ")
            )
        }
        Lifecycle::Sampled | Lifecycle::Topology => {
            let mut select = dims;
            select.extend(schema.metric_fields().map(|f| quote(f.name)));
            format!("SELECT {} FROM {}", select.join(", "), quote(table))
        }
    }
}

/// Copy unfinished rows no older than `?1` from `previous` into `current`.
pub(crate) fn carry_forward_sql(schema: &CategorySchema, previous: &str, current: &str) -> String {
    let columns = column_list(schema);
    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} IS NULL AND {} IS NOT NULL AND {} >= ?1\nON CONFLICT DO NOTHING",
        quote(current),
        columns,
        columns,
        quote(previous),
        quote(END_TIME),
        quote(START_TIME),
        quote(START_TIME)
    )
}

/// Count unfinished rows older than `?1`.
pub(crate) fn abandoned_count_sql(previous: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {} IS NULL AND {} IS NOT NULL AND {} < ?1",
        quote(previous),
        quote(END_TIME),
        quote(START_TIME),
        quote(START_TIME)
    )
}

/// Count finish halves whose start never arrived.
pub(crate) fn orphaned_finish_sql(table: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL AND {} IS NULL",
        quote(table),
        quote(END_TIME),
        quote(START_TIME)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema;

    #[test]
    fn test_quote() {
        assert_eq!(quote("os_metrics_5000"), "\"os_metrics_5000\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(schema(Category::OsMetrics), "os_metrics_0");
        assert!(sql.contains("\"ThreadID\" TEXT NOT NULL"));
        assert!(sql.contains("\"CPU_Utilization\" REAL"));
        assert!(sql.contains("UNIQUE(\"ThreadID\")"));
        assert!(!sql.contains("start_time"));

        let sql = create_table_sql(schema(Category::HttpRequests), "http_requests_0");
        assert!(sql.contains("\"start_time\" INTEGER"));
        assert!(sql.contains("\"end_time\" INTEGER"));
    }

    #[test]
    fn test_upsert_sql_lifecycles() {
        let sampled = upsert_sql(schema(Category::NodeMetrics), "t");
        assert!(sampled.contains("WHERE excluded.\"last_updated_time\" >= \"t\".\"last_updated_time\""));
        assert!(!sampled.contains("COALESCE"));

        let start_finish = upsert_sql(schema(Category::ShardOperations), "t");
        assert!(start_finish.contains("\"end_time\" = COALESCE(excluded.\"end_time\", \"t\".\"end_time\")"));
        assert!(!start_finish.contains("\"ThreadID\" = "));
    }

    #[test]
    fn test_projection_sql_groups_completed_rows() {
        let sql = projection_sql(schema(Category::ClusterManagerTasks), "t");
        assert!(sql.contains("COUNT(*)"));
        assert!(sql.contains("AVG(\"end_time\" - \"start_time\")"));
        assert!(sql.contains("GROUP BY COALESCE(\"TaskType\", ''), COALESCE(\"TaskPriority\", '')"));
    }
}
