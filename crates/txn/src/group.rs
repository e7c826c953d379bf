//! The unit-of-work handle and its transaction group.
//!
//! One group exists per outermost unit of work. It is carried by an explicit
//! cloneable handle that every perform closure receives; nothing about the
//! unit of work lives in ambient state.

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{ContentUrl, Identity};
use indexing::ReindexTask;
use repo_store::StoreTransaction;
use tokio::sync::Mutex;

use crate::context::TransactionContext;
use crate::error::{Result, TxnError};

/// Logical-transaction bookkeeping for one unit of work.
#[derive(Debug, Default)]
pub struct TransactionGroup {
    /// Contexts currently open, innermost last.
    pub open: Vec<TransactionContext>,
    /// Contexts finished inside this unit of work, in completion order.
    pub completed: Vec<TransactionContext>,
    /// When set, `WithinTx` contexts escalate to async instead of indexing
    /// inline after commit.
    pub inline_indexing_disabled: bool,
    /// Content written during the unit of work, deleted once on abort.
    pub created_urls: BTreeSet<ContentUrl>,
}

pub(crate) struct UowInner {
    pub(crate) group: TransactionGroup,
    /// Taken exactly once, at commit or abort.
    pub(crate) store_tx: Option<Box<dyn StoreTransaction>>,
}

/// Cheap cloneable handle on one unit of work.
#[derive(Clone)]
pub struct UnitOfWork {
    identity: Identity,
    pub(crate) inner: Arc<Mutex<UowInner>>,
}

impl UnitOfWork {
    pub(crate) fn new(identity: Identity, store_tx: Box<dyn StoreTransaction>) -> Self {
        Self {
            identity,
            inner: Arc::new(Mutex::new(UowInner {
                group: TransactionGroup::default(),
                store_tx: Some(store_tx),
            })),
        }
    }

    /// The identity the unit of work executes under.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Records a content url for exactly-once deletion on abort.
    pub async fn record_created(&self, url: ContentUrl) {
        self.inner.lock().await.group.created_urls.insert(url);
    }

    /// Routes `WithinTx` contexts to the queue instead of inline indexing.
    pub async fn disable_inline_indexing(&self) {
        self.inner.lock().await.group.inline_indexing_disabled = true;
    }

    /// Stashes a follow-up reindex on the innermost open context, submitted
    /// after the unit of work commits.
    pub async fn defer_reindex(&self, task: ReindexTask) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let context = inner.group.open.last_mut().ok_or(TxnError::Finished)?;
        context.deferred = Some(task);
        Ok(())
    }

    /// Demands a minimum queue priority on the innermost open context.
    pub async fn demand_priority(&self, priority: u8) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let context = inner.group.open.last_mut().ok_or(TxnError::Finished)?;
        context.demand_priority(priority);
        Ok(())
    }

    /// Takes the group and the store transaction, ending the unit of work.
    pub(crate) async fn dismantle(
        &self,
    ) -> Result<(TransactionGroup, Box<dyn StoreTransaction>)> {
        let mut inner = self.inner.lock().await;
        let store_tx = inner.store_tx.take().ok_or(TxnError::Finished)?;
        Ok((std::mem::take(&mut inner.group), store_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TenantId;
    use repo_store::{InMemoryTransactionStore, TransactionStore};

    async fn uow() -> UnitOfWork {
        let store = InMemoryTransactionStore::new();
        let tx = store.begin().await.unwrap();
        UnitOfWork::new(Identity::admin(TenantId::new("acme")), tx)
    }

    #[tokio::test]
    async fn created_urls_deduplicate() {
        let uow = uow().await;
        uow.record_created(ContentUrl::new("acme/a")).await;
        uow.record_created(ContentUrl::new("acme/a")).await;
        uow.record_created(ContentUrl::new("acme/b")).await;

        let inner = uow.inner.lock().await;
        assert_eq!(inner.group.created_urls.len(), 2);
    }

    #[tokio::test]
    async fn defer_without_open_context_fails() {
        let uow = uow().await;
        let task = ReindexTask::new(TenantId::new("acme"), vec![]);
        assert!(matches!(
            uow.defer_reindex(task).await,
            Err(TxnError::Finished)
        ));
    }

    #[tokio::test]
    async fn dismantle_only_once() {
        let uow = uow().await;
        assert!(uow.dismantle().await.is_ok());
        assert!(matches!(uow.dismantle().await, Err(TxnError::Finished)));
    }
}
