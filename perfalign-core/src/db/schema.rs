//! Metrics database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: aggregated metrics per reader window
    r#"
    CREATE TABLE IF NOT EXISTS windows (
        window_start     INTEGER PRIMARY KEY,
        window_end       INTEGER,
        written_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS metric_values (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        window_start     INTEGER NOT NULL,
        category         TEXT NOT NULL,
        metric           TEXT NOT NULL,

        -- Aggregation dimensions of the category, as a JSON object
        dimensions       JSON NOT NULL,

        sum              REAL,
        avg              REAL,
        min              REAL,
        max              REAL,
        sample_count     INTEGER NOT NULL,

        UNIQUE(window_start, category, metric, dimensions)
    );

    CREATE INDEX IF NOT EXISTS idx_metric_values_window ON metric_values(window_start);
    CREATE INDEX IF NOT EXISTS idx_metric_values_metric ON metric_values(category, metric);
    "#,
    // Version 2: cluster membership per reader window
    r#"
    CREATE TABLE IF NOT EXISTS cluster_nodes (
        window_start       INTEGER NOT NULL,
        node_id            TEXT NOT NULL,
        host_address       TEXT NOT NULL,
        role               TEXT NOT NULL,
        is_cluster_manager INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (window_start, node_id)
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking metrics database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["windows", "metric_values", "cluster_nodes"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_upgrade_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute("PRAGMA user_version = 1", []).unwrap();

        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }
}
