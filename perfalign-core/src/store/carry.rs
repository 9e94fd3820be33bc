//! In-flight carry-forward for start/finish categories
//!
//! An operation that started in window `w-1` and has not finished yet must
//! still be matchable when its finish lands in window `w`. When the new
//! window's snapshot is created, unfinished rows of the preceding snapshot
//! are copied into it. Rows that started more than `max_age` before the new
//! window are abandoned: their finish will never come, or it came too late
//! to matter.

use super::{table, Snapshot, SnapshotStore};
use crate::catalog::schema;
use crate::error::Result;
use crate::types::Millis;

/// Result of one rollover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CarryForward {
    pub carried: usize,
    pub abandoned: usize,
}

/// Copy unfinished rows from `previous` into `current`.
///
/// Rows whose `start_time` is older than `current.window_start - max_age`
/// are counted as abandoned and left behind. Rows already present in
/// `current` are not overwritten.
pub fn rollover(
    store: &SnapshotStore,
    previous: &Snapshot,
    current: &Snapshot,
    max_age: Millis,
) -> Result<CarryForward> {
    let category = current.category;
    let s = schema(category);
    if !s.is_start_finish() {
        return Ok(CarryForward::default());
    }

    let cutoff = current.window_start - max_age;
    let copy_sql = table::carry_forward_sql(s, &previous.table, &current.table);
    let abandoned_sql = table::abandoned_count_sql(&previous.table);

    let report = store.with_connection(|conn| {
        let tx = conn.transaction()?;
        let abandoned: i64 = tx.query_row(&abandoned_sql, [cutoff], |r| r.get(0))?;
        let carried = tx.execute(&copy_sql, [cutoff])?;
        tx.commit()?;
        Ok(CarryForward {
            carried,
            abandoned: abandoned as usize,
        })
    })?;

    if report.abandoned > 0 {
        tracing::info!(
            %category,
            from = previous.window_start,
            to = current.window_start,
            abandoned = report.abandoned,
            "Abandoning in-flight operations past the age bound (incomplete trace)"
        );
    }
    tracing::debug!(
        %category,
        from = previous.window_start,
        to = current.window_start,
        carried = report.carried,
        "Carried in-flight rows forward"
    );

    Ok(report)
}
