use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{TenantId, TxnId};

use crate::{ApplicationTransaction, Result};

/// The transactional metadata store seam.
///
/// One underlying ACID store transaction is opened per unit of work via
/// [`begin`](TransactionStore::begin); the read and maintenance operations go
/// through the store's own connections and are independent of any open unit
/// of work.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Opens a new store transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Looks up a transaction record by id.
    async fn get(&self, id: TxnId) -> Result<Option<ApplicationTransaction>>;

    /// Lists transaction records created in a time range, oldest first,
    /// capped at `limit`.
    async fn list_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ApplicationTransaction>>;

    /// Lists committed transactions the index has not caught up with yet.
    async fn list_unindexed(&self, limit: usize) -> Result<Vec<ApplicationTransaction>>;

    /// Records that the index has caught up with a transaction.
    async fn mark_indexed(&self, id: TxnId, at: DateTime<Utc>) -> Result<()>;

    /// Removes indexed transaction records older than the cutoff.
    /// Returns the number of records removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Removes entity records no longer referenced by any transaction.
    /// Returns the number of records removed.
    async fn purge_orphans(&self, tenant: &TenantId) -> Result<u64>;
}

/// One open store transaction.
///
/// Dropped without [`commit`](StoreTransaction::commit) the transaction rolls
/// back; the explicit [`rollback`](StoreTransaction::rollback) exists so
/// callers can observe rollback failures.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Creates a new logical transaction record inside this store transaction.
    ///
    /// The numeric id comes from the store's sequence and is never reused,
    /// even if this store transaction later rolls back.
    async fn create_transaction(&mut self, tenant: &TenantId) -> Result<ApplicationTransaction>;

    /// Commits the store transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rolls the store transaction back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
