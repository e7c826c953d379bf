//! Indexing mode ladder and the perform-closure result value.

use std::collections::HashSet;

use common::TxnId;
use uuid::Uuid;

/// How a logical transaction wants its index maintenance done.
///
/// The ladder is ordered; a context only ever climbs toward `Async` as work
/// accumulates. A deliberate downgrade goes through
/// [`override_mode`](crate::TransactionContext::override_mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum IndexingMode {
    /// No index maintenance at all.
    #[default]
    None,
    /// Index inline, immediately after commit.
    WithinTx,
    /// Index synchronously, subject to the row ceiling.
    Sync,
    /// Queue a reindex task.
    Async,
}

/// What a perform closure hands back to the coordinator.
///
/// Pure value; the coordinator folds mode, row count and priority uuids into
/// the enclosing context and returns `value` to the caller.
#[derive(Debug)]
pub struct PerformResult<T> {
    /// The caller's own result.
    pub value: T,
    /// Desired indexing mode for the work done.
    pub mode: IndexingMode,
    /// Rows touched; non-positive means unknown.
    pub row_count: i64,
    /// Logical transaction the work belongs to; defaults to the innermost.
    pub tx_id: Option<TxnId>,
    /// Entities that must be indexed first if the context escalates.
    pub priority_uuids: HashSet<Uuid>,
}

impl<T> PerformResult<T> {
    /// Wraps a value with no indexing demands.
    pub fn of(value: T) -> Self {
        Self {
            value,
            mode: IndexingMode::None,
            row_count: 0,
            tx_id: None,
            priority_uuids: HashSet::new(),
        }
    }

    pub fn with_mode(mut self, mode: IndexingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_row_count(mut self, row_count: i64) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn with_tx_id(mut self, tx_id: TxnId) -> Self {
        self.tx_id = Some(tx_id);
        self
    }

    pub fn with_priority_uuids(mut self, uuids: impl IntoIterator<Item = Uuid>) -> Self {
        self.priority_uuids.extend(uuids);
        self
    }
}
