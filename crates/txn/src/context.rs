//! Per-logical-transaction indexing state.

use std::collections::HashSet;

use indexing::ReindexTask;
use repo_store::ApplicationTransaction;
use uuid::Uuid;

use crate::mode::{IndexingMode, PerformResult};

/// Indexing state accumulated for one logical transaction.
#[derive(Debug)]
pub struct TransactionContext {
    /// The transaction record created inside the unit of work.
    pub transaction: ApplicationTransaction,
    /// Current rung on the mode ladder.
    pub mode: IndexingMode,
    /// Accumulated touched-row count.
    pub row_count: i64,
    /// Follow-up reindex stashed for after commit.
    pub deferred: Option<ReindexTask>,
    /// Entities indexed first when the context escalates.
    pub priority_uuids: HashSet<Uuid>,
    /// Queue priority demanded by this context.
    pub priority: u8,
}

impl TransactionContext {
    pub fn new(transaction: ApplicationTransaction) -> Self {
        Self {
            transaction,
            mode: IndexingMode::None,
            row_count: 0,
            deferred: None,
            priority_uuids: HashSet::new(),
            priority: 0,
        }
    }

    /// Climbs the mode ladder; never steps down.
    pub fn escalate(&mut self, mode: IndexingMode) {
        if mode > self.mode {
            self.mode = mode;
        }
    }

    /// Deliberate downgrade past the ladder.
    pub fn override_mode(&mut self, mode: IndexingMode) {
        self.mode = mode;
    }

    /// Demands at least the given queue priority.
    pub fn demand_priority(&mut self, priority: u8) {
        self.priority = self.priority.max(priority);
    }

    /// Folds one perform-closure result into this context.
    pub fn absorb<T>(&mut self, result: &PerformResult<T>) {
        self.escalate(result.mode);
        if result.row_count > 0 {
            self.row_count += result.row_count;
        }
        self.priority_uuids.extend(result.priority_uuids.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{TenantId, TxnId, TxnUuid};

    fn ctx() -> TransactionContext {
        TransactionContext::new(ApplicationTransaction {
            id: TxnId::new(1),
            tenant: TenantId::new("acme"),
            uuid: TxnUuid::new(),
            created_at: Utc::now(),
            indexed_at: None,
            schema_version: 1,
        })
    }

    #[test]
    fn escalate_is_monotonic() {
        let mut ctx = ctx();
        ctx.escalate(IndexingMode::Sync);
        ctx.escalate(IndexingMode::WithinTx);
        assert_eq!(ctx.mode, IndexingMode::Sync);
        ctx.escalate(IndexingMode::Async);
        assert_eq!(ctx.mode, IndexingMode::Async);
    }

    #[test]
    fn override_steps_down() {
        let mut ctx = ctx();
        ctx.escalate(IndexingMode::Async);
        ctx.override_mode(IndexingMode::None);
        assert_eq!(ctx.mode, IndexingMode::None);
    }

    #[test]
    fn absorb_accumulates() {
        let mut ctx = ctx();
        let uuid = Uuid::new_v4();
        ctx.absorb(
            &PerformResult::of(())
                .with_mode(IndexingMode::Sync)
                .with_row_count(10)
                .with_priority_uuids([uuid]),
        );
        ctx.absorb(&PerformResult::of(()).with_row_count(5));
        // Unknown counts never reduce the accumulator.
        ctx.absorb(&PerformResult::of(()).with_row_count(-1));

        assert_eq!(ctx.mode, IndexingMode::Sync);
        assert_eq!(ctx.row_count, 15);
        assert!(ctx.priority_uuids.contains(&uuid));
    }
}
