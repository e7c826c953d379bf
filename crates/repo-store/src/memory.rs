use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{TenantId, TxnId, TxnUuid};

use crate::{
    ApplicationTransaction, Result, StoreError,
    store::{StoreTransaction, TransactionStore},
};

#[derive(Debug, Default)]
struct StoreState {
    next_id: i64,
    committed: BTreeMap<i64, ApplicationTransaction>,
    begun: u64,
    fail_on_begin: bool,
    fail_on_commit: bool,
}

/// In-memory transaction store for testing.
///
/// Mirrors the Postgres implementation: ids come from a shared sequence and
/// records only become visible once the owning store transaction commits.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionStore {
    state: Arc<RwLock<StoreState>>,
    schema_version: i64,
}

impl InMemoryTransactionStore {
    /// Creates a new empty store at schema version 1.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            schema_version: 1,
        }
    }

    /// Returns how many store transactions have been opened.
    pub fn begun_count(&self) -> u64 {
        self.state.read().unwrap().begun
    }

    /// Returns the number of committed transaction records.
    pub fn committed_count(&self) -> usize {
        self.state.read().unwrap().committed.len()
    }

    /// Configures the store to fail when opening a transaction.
    pub fn set_fail_on_begin(&self, fail: bool) {
        self.state.write().unwrap().fail_on_begin = fail;
    }

    /// Configures the store to fail at commit time.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().unwrap().fail_on_commit = fail;
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_begin {
            return Err(StoreError::Backend("begin refused".to_string()));
        }
        state.begun += 1;
        Ok(Box::new(InMemoryStoreTransaction {
            state: Arc::clone(&self.state),
            schema_version: self.schema_version,
            staged: Vec::new(),
            finished: false,
        }))
    }

    async fn get(&self, id: TxnId) -> Result<Option<ApplicationTransaction>> {
        Ok(self.state.read().unwrap().committed.get(&id.as_i64()).cloned())
    }

    async fn list_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ApplicationTransaction>> {
        let state = self.state.read().unwrap();
        Ok(state
            .committed
            .values()
            .filter(|tx| tx.created_at >= from && tx.created_at <= to)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_unindexed(&self, limit: usize) -> Result<Vec<ApplicationTransaction>> {
        let state = self.state.read().unwrap();
        Ok(state
            .committed
            .values()
            .filter(|tx| tx.indexed_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_indexed(&self, id: TxnId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let tx = state
            .committed
            .get_mut(&id.as_i64())
            .ok_or(StoreError::TransactionNotFound(id))?;
        tx.indexed_at = Some(at);
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        let before = state.committed.len();
        state
            .committed
            .retain(|_, tx| tx.created_at >= cutoff || tx.indexed_at.is_none());
        Ok((before - state.committed.len()) as u64)
    }

    async fn purge_orphans(&self, _tenant: &TenantId) -> Result<u64> {
        // The in-memory store keeps no entity table; nothing can orphan.
        Ok(0)
    }
}

struct InMemoryStoreTransaction {
    state: Arc<RwLock<StoreState>>,
    schema_version: i64,
    staged: Vec<ApplicationTransaction>,
    finished: bool,
}

#[async_trait]
impl StoreTransaction for InMemoryStoreTransaction {
    async fn create_transaction(&mut self, tenant: &TenantId) -> Result<ApplicationTransaction> {
        if self.finished {
            return Err(StoreError::TransactionCompleted);
        }
        let id = {
            let mut state = self.state.write().unwrap();
            state.next_id += 1;
            state.next_id
        };
        let tx = ApplicationTransaction {
            id: TxnId::new(id),
            tenant: tenant.clone(),
            uuid: TxnUuid::new(),
            created_at: Utc::now(),
            indexed_at: None,
            schema_version: self.schema_version,
        };
        self.staged.push(tx.clone());
        Ok(tx)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_commit {
            return Err(StoreError::Backend("commit refused".to_string()));
        }
        for tx in self.staged.drain(..) {
            state.committed.insert(tx.id.as_i64(), tx);
        }
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.staged.clear();
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_makes_records_visible() {
        let store = InMemoryTransactionStore::new();
        let tenant = TenantId::new("acme");

        let mut stx = store.begin().await.unwrap();
        let tx = stx.create_transaction(&tenant).await.unwrap();
        assert!(store.get(tx.id).await.unwrap().is_none());

        stx.commit().await.unwrap();
        let stored = store.get(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.uuid, tx.uuid);
        assert_eq!(store.begun_count(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_staged_records() {
        let store = InMemoryTransactionStore::new();
        let tenant = TenantId::new("acme");

        let mut stx = store.begin().await.unwrap();
        let tx = stx.create_transaction(&tenant).await.unwrap();
        stx.rollback().await.unwrap();

        assert!(store.get(tx.id).await.unwrap().is_none());
        assert_eq!(store.committed_count(), 0);
    }

    #[tokio::test]
    async fn ids_are_never_reused_after_rollback() {
        let store = InMemoryTransactionStore::new();
        let tenant = TenantId::new("acme");

        let mut stx = store.begin().await.unwrap();
        let first = stx.create_transaction(&tenant).await.unwrap();
        stx.rollback().await.unwrap();

        let mut stx = store.begin().await.unwrap();
        let second = stx.create_transaction(&tenant).await.unwrap();
        stx.commit().await.unwrap();

        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn mark_indexed_and_list_unindexed() {
        let store = InMemoryTransactionStore::new();
        let tenant = TenantId::new("acme");

        let mut stx = store.begin().await.unwrap();
        let a = stx.create_transaction(&tenant).await.unwrap();
        let b = stx.create_transaction(&tenant).await.unwrap();
        stx.commit().await.unwrap();

        assert_eq!(store.list_unindexed(10).await.unwrap().len(), 2);
        store.mark_indexed(a.id, Utc::now()).await.unwrap();

        let pending = store.list_unindexed(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
    }

    #[tokio::test]
    async fn purge_keeps_unindexed_records() {
        let store = InMemoryTransactionStore::new();
        let tenant = TenantId::new("acme");

        let mut stx = store.begin().await.unwrap();
        let a = stx.create_transaction(&tenant).await.unwrap();
        let _b = stx.create_transaction(&tenant).await.unwrap();
        stx.commit().await.unwrap();

        store.mark_indexed(a.id, Utc::now()).await.unwrap();
        let removed = store.purge_before(Utc::now()).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.get(a.id).await.unwrap().is_none());
        assert_eq!(store.committed_count(), 1);
    }

    #[tokio::test]
    async fn fail_on_commit_surfaces_error() {
        let store = InMemoryTransactionStore::new();
        let tenant = TenantId::new("acme");
        store.set_fail_on_commit(true);

        let mut stx = store.begin().await.unwrap();
        stx.create_transaction(&tenant).await.unwrap();
        assert!(stx.commit().await.is_err());
        assert_eq!(store.committed_count(), 0);
    }
}
