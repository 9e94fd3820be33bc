//! Category processor abstraction
//!
//! Every category implements [`EventProcessor`]. The dispatcher drives one
//! window at a time:
//!
//! 1. `initialize` binds the processor to the bucket window and makes sure
//!    the category's snapshot exists
//! 2. `should_handle` / `process` for every event, buffering rows
//! 3. `commit_batch` whenever the buffer grows past the flush threshold
//! 4. `finalize` flushes what is left
//!
//! Processors never fail on bad input. A block that cannot be used is
//! reported through [`ProcessOutcome`] and dropped; only store errors are
//! returned as `Err`.

use super::block::ParseError;
use crate::error::Result;
use crate::store::{Row, SnapshotStore};
use crate::types::{Category, Event, Millis, Window};

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Rows buffered for the current window
    Buffered(usize),
    /// Timestamp outside the current window
    Stale { current_time: Millis },
    /// Block or row could not be decoded
    Rejected(ParseError),
}

/// Parses one category's events into snapshot rows.
pub trait EventProcessor: Send {
    fn category(&self) -> Category;

    /// Bind to `window` and ensure its snapshot exists.
    fn initialize(&mut self, store: &SnapshotStore, window: Window) -> Result<()>;

    /// Whether this processor claims the event's key path.
    fn should_handle(&self, event: &Event) -> bool;

    /// Decode an event into buffered rows.
    fn process(&mut self, event: &Event) -> ProcessOutcome;

    /// Rows buffered since the last commit.
    fn pending_rows(&self) -> usize;

    /// Flush buffered rows into the store in one transaction.
    fn commit_batch(&mut self, store: &SnapshotStore) -> Result<usize>;

    /// Flush remaining rows at the end of the window.
    fn finalize(&mut self, store: &SnapshotStore) -> Result<usize> {
        self.commit_batch(store)
    }
}

/// Rows buffered for the window a processor is bound to.
#[derive(Debug, Default)]
pub(crate) struct PendingBatch {
    window: Option<Window>,
    rows: Vec<Row>,
}

impl PendingBatch {
    /// Rebind to a new window, discarding anything not yet committed.
    pub(crate) fn reset(&mut self, window: Window) {
        if !self.rows.is_empty() {
            tracing::warn!(
                discarded = self.rows.len(),
                "Uncommitted rows discarded on window change"
            );
        }
        self.window = Some(window);
        self.rows = Vec::new();
    }

    /// Check `current_time` against the bound window.
    pub(crate) fn accepts(&self, current_time: Millis) -> bool {
        self.window.is_some_and(|w| w.contains(current_time))
    }

    pub(crate) fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn commit(&mut self, store: &SnapshotStore, category: Category) -> Result<usize> {
        let Some(window) = self.window else {
            return Ok(0);
        };
        if self.rows.is_empty() {
            return Ok(0);
        }

        let rows = std::mem::take(&mut self.rows);
        let written = store.write_rows(category, window.start, &rows)?;
        tracing::trace!(%category, window_start = window.start, written, "Committed batch");
        Ok(written)
    }
}
