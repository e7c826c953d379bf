//! Unit-of-work lifecycle: open, nest, commit, classify, compensate.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_ops::MessageSender;
use common::{Identity, TenantId, TxnId};
use indexing::{IndexCoordinator, IndexEngine, ReindexTask};
use repo_store::{ContentStore, TransactionStore};
use uuid::Uuid;

use crate::config::{ExecutionContext, TxnConfig};
use crate::context::TransactionContext;
use crate::error::{Result, TxnError};
use crate::group::{TransactionGroup, UnitOfWork};
use crate::mode::{IndexingMode, PerformResult};

/// Queue priority given to work the synchronous path had to give up on.
const ESCALATED_PRIORITY: u8 = 7;

/// Coordinates units of work against the store and the index.
///
/// All collaborators arrive through the constructor; the coordinator holds
/// no ambient state and can be cloned freely behind an `Arc`.
pub struct TransactionCoordinator<T, E, P, C> {
    store: Arc<T>,
    index: Arc<IndexCoordinator<E, P>>,
    content: Arc<C>,
    config: TxnConfig,
}

impl<T, E, P, C> TransactionCoordinator<T, E, P, C>
where
    T: TransactionStore,
    E: IndexEngine,
    P: MessageSender,
    C: ContentStore,
{
    pub fn new(
        store: Arc<T>,
        index: Arc<IndexCoordinator<E, P>>,
        content: Arc<C>,
        config: TxnConfig,
    ) -> Self {
        Self {
            store,
            index,
            content,
            config,
        }
    }

    /// Runs a closure inside an existing unit of work.
    ///
    /// With a context already open the closure joins it and its result
    /// accumulates there; no second logical transaction is created. With no
    /// open context a new logical transaction is opened inside the unit of
    /// work's single store transaction.
    pub async fn perform<R, F, Fut>(&self, uow: &UnitOfWork, f: F) -> Result<R>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<PerformResult<R>>>,
    {
        let nested = !uow.inner.lock().await.group.open.is_empty();
        if nested {
            let result = f(uow.clone()).await?;
            let mut inner = uow.inner.lock().await;
            let context =
                target_context(&mut inner.group, result.tx_id).ok_or(TxnError::Finished)?;
            context.absorb(&result);
            return Ok(result.value);
        }

        {
            let tenant = uow.identity().tenant.clone();
            let mut inner = uow.inner.lock().await;
            let store_tx = inner.store_tx.as_mut().ok_or(TxnError::Finished)?;
            let transaction = store_tx.create_transaction(&tenant).await?;
            tracing::debug!(tx = %transaction.id, %tenant, "logical transaction opened");
            inner.group.open.push(TransactionContext::new(transaction));
        }

        match f(uow.clone()).await {
            Ok(result) => {
                let mut inner = uow.inner.lock().await;
                let mut context = inner.group.open.pop().ok_or(TxnError::Finished)?;
                context.absorb(&result);
                inner.group.completed.push(context);
                Ok(result.value)
            }
            // The context stays open so abort compensation still sees it.
            Err(e) => Err(e),
        }
    }

    /// Opens a fresh unit of work under the interactive timeout budget.
    ///
    /// The closure orchestrates the unit of work: it calls
    /// [`perform`](Self::perform) one or more times against the handle it
    /// receives. Commit, classification and compensation happen here.
    pub async fn perform_new<R, F, Fut>(&self, identity: &Identity, f: F) -> Result<R>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.perform_new_in(identity, ExecutionContext::Sync, f).await
    }

    /// Opens a fresh unit of work under an explicit execution context.
    #[tracing::instrument(skip(self, f), fields(identity = %identity))]
    pub async fn perform_new_in<R, F, Fut>(
        &self,
        identity: &Identity,
        execution: ExecutionContext,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let budget = self.config.timeout_for(execution);
        let store_tx = self.store.begin().await?;
        let uow = UnitOfWork::new(identity.clone(), store_tx);

        match tokio::time::timeout(budget, f(uow.clone())).await {
            Ok(Ok(value)) => {
                let (group, store_tx) = uow.dismantle().await?;
                match store_tx.commit().await {
                    Ok(()) => {
                        metrics::counter!("txn_commits").increment(1);
                        self.post_commit(&group).await;
                        Ok(value)
                    }
                    Err(e) => {
                        metrics::counter!("txn_aborts", "cause" => "commit").increment(1);
                        self.compensate(&group).await;
                        Err(e.into())
                    }
                }
            }
            Ok(Err(e)) => {
                metrics::counter!("txn_aborts", "cause" => "operation").increment(1);
                self.abort(&uow).await;
                Err(e)
            }
            Err(_) => {
                metrics::counter!("txn_aborts", "cause" => "timeout").increment(1);
                tracing::warn!(?budget, "unit of work timed out");
                self.abort(&uow).await;
                Err(TxnError::Timeout(budget))
            }
        }
    }

    /// Alias of [`perform_new_in`](Self::perform_new_in); always a fresh
    /// unit of work, never joined to a caller's.
    pub async fn require_new<R, F, Fut>(
        &self,
        identity: &Identity,
        execution: ExecutionContext,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.perform_new_in(identity, execution, f).await
    }

    /// Runs a closure as another user on the caller's tenant. The caller's
    /// identity is a value it keeps; nothing is restored afterwards because
    /// nothing was replaced.
    pub async fn do_as_user<R, F, Fut>(&self, base: &Identity, user: &str, f: F) -> R
    where
        F: FnOnce(Identity) -> Fut,
        Fut: Future<Output = R>,
    {
        f(base.as_user(user)).await
    }

    /// Runs a closure as the tenant administrator.
    pub async fn do_as_admin<R, F, Fut>(&self, base: &Identity, f: F) -> R
    where
        F: FnOnce(Identity) -> Fut,
        Fut: Future<Output = R>,
    {
        f(Identity::admin(base.tenant.clone())).await
    }

    /// Runs a closure as the administrator of another tenant.
    pub async fn do_on_tenant<R, F, Fut>(&self, base: &Identity, tenant: TenantId, f: F) -> R
    where
        F: FnOnce(Identity) -> Fut,
        Fut: Future<Output = R>,
    {
        f(base.on_tenant(tenant)).await
    }

    /// Runs a closure on the temporary scratch tenant.
    pub async fn do_on_temp<R, F, Fut>(&self, f: F) -> R
    where
        F: FnOnce(Identity) -> Fut,
        Fut: Future<Output = R>,
    {
        f(Identity::temp()).await
    }

    /// Classifies every completed context after a successful commit.
    async fn post_commit(&self, group: &TransactionGroup) {
        let mut queued: HashMap<TenantId, (Vec<TxnId>, u8)> = HashMap::new();

        for context in &group.completed {
            let tenant = context.transaction.tenant.clone();
            let id = context.transaction.id;
            match context.mode {
                IndexingMode::None => {}
                IndexingMode::WithinTx => {
                    if group.inline_indexing_disabled {
                        enqueue(&mut queued, tenant, id, context.priority);
                    } else if let Err(e) = self.index.execute_deferring(&tenant, vec![id]).await {
                        tracing::warn!(tx = %id, error = %e, "inline reindex failed, queueing");
                        metrics::counter!("txn_index_escalations", "from" => "within_tx")
                            .increment(1);
                        enqueue(
                            &mut queued,
                            tenant,
                            id,
                            context.priority.max(ESCALATED_PRIORITY),
                        );
                    }
                }
                IndexingMode::Sync => {
                    self.classify_sync(context, &mut queued).await;
                }
                IndexingMode::Async => enqueue(&mut queued, tenant, id, context.priority),
            }
            if let Some(task) = &context.deferred {
                self.index.submit(task.clone()).await;
            }
        }

        for (tenant, (tx_ids, priority)) in queued {
            self.index
                .submit(ReindexTask::new(tenant, tx_ids).with_priority(priority))
                .await;
        }
    }

    /// The synchronous path: index inline when the touched-row count is
    /// known and small, otherwise escalate with the priority entities done
    /// first.
    async fn classify_sync(
        &self,
        context: &TransactionContext,
        queued: &mut HashMap<TenantId, (Vec<TxnId>, u8)>,
    ) {
        let tenant = context.transaction.tenant.clone();
        let id = context.transaction.id;

        if context.row_count <= 0 || context.row_count > self.config.max_sync_rows {
            if !context.priority_uuids.is_empty() {
                let include: BTreeSet<Uuid> = context.priority_uuids.iter().copied().collect();
                if let Err(e) = self
                    .index
                    .execute(&tenant, vec![id], Some(include), true)
                    .await
                {
                    tracing::warn!(tx = %id, error = %e, "priority reindex failed");
                }
            }
            metrics::counter!("txn_index_escalations", "from" => "sync").increment(1);
            enqueue(queued, tenant, id, context.priority.max(ESCALATED_PRIORITY));
            return;
        }

        if let Err(e) = self.index.execute(&tenant, vec![id], None, true).await {
            tracing::warn!(tx = %id, error = %e, "sync reindex failed, queueing");
            metrics::counter!("txn_index_escalations", "from" => "sync").increment(1);
            enqueue(queued, tenant, id, context.priority.max(ESCALATED_PRIORITY));
        }
    }

    /// Rolls the store transaction back and compensates, swallowing
    /// compensation failures.
    async fn abort(&self, uow: &UnitOfWork) {
        let Ok((group, store_tx)) = uow.dismantle().await else {
            return;
        };
        if let Err(e) = store_tx.rollback().await {
            tracing::warn!(error = %e, "store rollback failed");
        }
        self.compensate(&group).await;
    }

    /// Removes index entries for every context and deletes each created
    /// content url exactly once. Best effort throughout.
    async fn compensate(&self, group: &TransactionGroup) {
        for context in group.open.iter().chain(group.completed.iter()) {
            let tenant = &context.transaction.tenant;
            if let Err(e) = self
                .index
                .remove_transaction(tenant, context.transaction.uuid)
                .await
            {
                tracing::warn!(tx = %context.transaction.id, error = %e, "index compensation failed");
            }
        }
        for url in &group.created_urls {
            if let Err(e) = self.content.delete(url).await {
                tracing::warn!(%url, error = %e, "content compensation failed");
            }
        }
        metrics::counter!("txn_compensations").increment(1);
    }
}

fn enqueue(
    queued: &mut HashMap<TenantId, (Vec<TxnId>, u8)>,
    tenant: TenantId,
    id: TxnId,
    priority: u8,
) {
    let entry = queued.entry(tenant).or_default();
    entry.0.push(id);
    entry.1 = entry.1.max(priority);
}

fn target_context(
    group: &mut TransactionGroup,
    tx_id: Option<TxnId>,
) -> Option<&mut TransactionContext> {
    match tx_id {
        Some(id) => group
            .open
            .iter_mut()
            .rev()
            .find(|c| c.transaction.id == id),
        None => group.open.last_mut(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_merges_per_tenant_and_keeps_max_priority() {
        let mut queued = HashMap::new();
        enqueue(&mut queued, TenantId::new("acme"), TxnId::new(1), 0);
        enqueue(&mut queued, TenantId::new("acme"), TxnId::new(2), 7);
        enqueue(&mut queued, TenantId::new("other"), TxnId::new(3), 2);

        let (ids, priority) = &queued[&TenantId::new("acme")];
        assert_eq!(ids, &vec![TxnId::new(1), TxnId::new(2)]);
        assert_eq!(*priority, 7);
        assert_eq!(queued.len(), 2);
    }
}
