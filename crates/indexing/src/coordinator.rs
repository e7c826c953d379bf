//! Drives the index engine on behalf of the transaction layer.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_ops::MessageSender;
use common::{TenantId, TxnId, TxnUuid};
use messaging::ConsumerConfig;
use uuid::Uuid;

use crate::engine::{IndexEngine, ReindexRequest};
use crate::error::Result;
use crate::task::ReindexTask;

/// Front door for index maintenance.
///
/// Synchronous work goes straight to the engine; queued work is routed to a
/// consumer channel by task priority. Enqueueing is deliberately best effort:
/// a committed business transaction must never fail because the reindex
/// queue is unavailable, so submit failures are logged and counted only.
pub struct IndexCoordinator<E, P> {
    engine: Arc<E>,
    producer: Arc<P>,
    channels: ConsumerConfig,
}

impl<E, P> IndexCoordinator<E, P>
where
    E: IndexEngine,
    P: MessageSender,
{
    pub fn new(engine: Arc<E>, producer: Arc<P>, channels: ConsumerConfig) -> Self {
        Self {
            engine,
            producer,
            channels,
        }
    }

    /// Synchronously reindexes the given transactions.
    #[tracing::instrument(skip(self, tx_ids, include), fields(tenant = %tenant, txns = tx_ids.len()))]
    pub async fn execute(
        &self,
        tenant: &TenantId,
        tx_ids: Vec<TxnId>,
        include: Option<BTreeSet<Uuid>>,
        completed: bool,
    ) -> Result<()> {
        let mut request = ReindexRequest::full(tx_ids).with_completed(completed);
        request.include = include;
        self.engine.reindex(tenant, &request).await?;
        metrics::counter!("index_sync_reindexes").increment(1);
        Ok(())
    }

    /// Synchronously reindexes, relaying any follow-up the engine defers.
    #[tracing::instrument(skip(self, tx_ids), fields(tenant = %tenant, txns = tx_ids.len()))]
    pub async fn execute_deferring(&self, tenant: &TenantId, tx_ids: Vec<TxnId>) -> Result<()> {
        let request = ReindexRequest::full(tx_ids);
        let outcome = self.engine.reindex(tenant, &request).await?;
        metrics::counter!("index_sync_reindexes").increment(1);
        if let Some(deferred) = outcome.deferred {
            self.submit(deferred).await;
        }
        Ok(())
    }

    /// Removes every index entry left by a rolled-back transaction.
    #[tracing::instrument(skip(self), fields(tenant = %tenant, tx = %tx))]
    pub async fn remove_transaction(&self, tenant: &TenantId, tx: TxnUuid) -> Result<()> {
        self.engine.remove_transaction(tenant, tx).await
    }

    /// Queues a reindex task on the channel matching its priority.
    pub async fn submit(&self, task: ReindexTask) {
        let Some(channel) = self.channels.channel_for_priority(task.priority) else {
            tracing::error!(tenant = %task.tenant, "no consumer channel configured");
            metrics::counter!("index_submit_failures").increment(1);
            return;
        };
        let destination = channel.destination.clone();
        match self.producer.send(&destination, task.to_message()).await {
            Ok(_) => {
                metrics::counter!("index_submitted", "channel" => destination).increment(1);
            }
            Err(e) => {
                tracing::error!(
                    tenant = %task.tenant,
                    channel = %destination,
                    error = %e,
                    "reindex enqueue failed, index will lag until reconciliation"
                );
                metrics::counter!("index_submit_failures").increment(1);
            }
        }
    }
}
