//! Concrete message handlers for the dispatcher's routing table.
//!
//! Handlers translate wire attributes into engine and store calls and map
//! failures onto the dispatcher's drop/retry classification: malformed
//! attributes are bad messages, missing records are client errors, and
//! engine or store failures are server errors left for redelivery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use async_ops::{AsyncOpError, AsyncOperationService, AsyncOperationStore, TaskStatus};
use chrono::{DateTime, Utc};
use common::{Identity, Message, TaskId, TenantId, message_types, properties};
use messaging::{Dispatcher, HandlerError, MessageHandler};
use repo_store::{ContentStore, StoreError, TransactionStore};
use uuid::Uuid;

use crate::engine::{IndexEngine, ReindexRequest};
use crate::error::IndexingError;
use crate::task::ReindexTask;

/// Handler-specific wire attribute keys.
mod attr {
    pub const FROM: &str = "from";
    pub const TO: &str = "to";
    pub const LINK_TYPE: &str = "linkType";
    pub const ACTION: &str = "action";
    pub const NODES: &str = "nodes";
    pub const BEFORE: &str = "before";
    pub const FROM_TIME: &str = "fromTime";
    pub const TO_TIME: &str = "toTime";
    pub const BLOCK_SIZE: &str = "blockSize";
}

/// Cap on transactions pulled per range or reconciliation pass.
const MAX_BATCH: usize = 10_000;
const DEFAULT_BLOCK_SIZE: usize = 100;
const RECONCILE_LIMIT: usize = 500;

/// Creates a link between two entities. Kept as a seam; link semantics live
/// outside the indexing core.
#[async_trait]
pub trait LinkWriter: Send + Sync {
    async fn create_link(
        &self,
        identity: &Identity,
        from: Uuid,
        to: Uuid,
        link_type: &str,
    ) -> crate::Result<()>;
}

/// Runs one named action over a set of entities.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run(&self, identity: &Identity, action: &str, nodes: &[Uuid]) -> crate::Result<()>;
}

fn engine_error(e: IndexingError) -> HandlerError {
    match e {
        IndexingError::BadAttribute { .. } => HandlerError::BadMessage(e.to_string()),
        IndexingError::Store(StoreError::TransactionNotFound(_))
        | IndexingError::Store(StoreError::ContentNotFound(_)) => {
            HandlerError::Client(e.to_string())
        }
        other => HandlerError::Server(other.to_string()),
    }
}

fn store_error(e: StoreError) -> HandlerError {
    engine_error(IndexingError::Store(e))
}

fn required<'a>(message: &'a Message, key: &str) -> Result<&'a str, HandlerError> {
    message
        .property(key)
        .ok_or_else(|| HandlerError::BadMessage(format!("missing attribute '{key}'")))
}

fn parse_time(message: &Message, key: &str) -> Result<DateTime<Utc>, HandlerError> {
    let raw = required(message, key)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| HandlerError::BadMessage(format!("unparseable time '{raw}' in '{key}'")))
}

fn parse_uuid(message: &Message, key: &str) -> Result<Uuid, HandlerError> {
    let raw = required(message, key)?;
    raw.parse()
        .map_err(|_| HandlerError::BadMessage(format!("unparseable uuid '{raw}' in '{key}'")))
}

fn identity_of<'a>(identity: Option<&'a Identity>) -> Result<&'a Identity, HandlerError> {
    identity.ok_or_else(|| HandlerError::BadMessage("identity required".to_string()))
}

/// Marks traced operations successful once a handler finishes.
///
/// An already-terminal or unknown task is tolerated; a redelivered message
/// must not fail on the second completion attempt.
struct TaskTracker<S: AsyncOperationStore> {
    async_ops: AsyncOperationService<S>,
}

impl<S: AsyncOperationStore> TaskTracker<S> {
    async fn succeed(&self, message: &Message, attributes: HashMap<String, serde_json::Value>) {
        let Some(task_id) = message.property(properties::TASK_ID).map(TaskId::new) else {
            return;
        };
        match self
            .async_ops
            .complete_task(&task_id, TaskStatus::Success, attributes)
            .await
        {
            Ok(_) => {}
            Err(AsyncOpError::PreconditionFailed { .. } | AsyncOpError::TaskNotFound(_)) => {
                tracing::debug!(%task_id, "task already settled");
            }
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "failed to record task success");
            }
        }
    }
}

/// `reindex`: bring the index up to date for an explicit transaction set.
pub struct ReindexHandler<S: AsyncOperationStore> {
    engine: Arc<dyn IndexEngine>,
    tracker: TaskTracker<S>,
}

impl<S: AsyncOperationStore> ReindexHandler<S> {
    pub fn new(engine: Arc<dyn IndexEngine>, async_ops: AsyncOperationService<S>) -> Self {
        Self {
            engine,
            tracker: TaskTracker { async_ops },
        }
    }
}

#[async_trait]
impl<S: AsyncOperationStore> MessageHandler for ReindexHandler<S> {
    fn requires_trace(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        message: &Message,
        _identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        let task = ReindexTask::from_message(message).map_err(engine_error)?;
        self.engine
            .reindex(&task.tenant, &ReindexRequest::from(&task))
            .await
            .map_err(engine_error)?;
        self.tracker
            .succeed(
                message,
                HashMap::from([("txns".to_string(), serde_json::json!(task.tx_ids.len()))]),
            )
            .await;
        Ok(())
    }
}

/// `reindex-range`: reindex every transaction created in a time range, in
/// blocks, grouped per tenant.
pub struct ReindexRangeHandler<S: AsyncOperationStore> {
    engine: Arc<dyn IndexEngine>,
    store: Arc<dyn TransactionStore>,
    tracker: TaskTracker<S>,
}

impl<S: AsyncOperationStore> ReindexRangeHandler<S> {
    pub fn new(
        engine: Arc<dyn IndexEngine>,
        store: Arc<dyn TransactionStore>,
        async_ops: AsyncOperationService<S>,
    ) -> Self {
        Self {
            engine,
            store,
            tracker: TaskTracker { async_ops },
        }
    }
}

#[async_trait]
impl<S: AsyncOperationStore> MessageHandler for ReindexRangeHandler<S> {
    fn requires_trace(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        message: &Message,
        _identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        let from = parse_time(message, attr::FROM_TIME)?;
        let to = parse_time(message, attr::TO_TIME)?;
        let block_size = message
            .property(attr::BLOCK_SIZE)
            .map(|raw| {
                raw.parse::<usize>().map_err(|_| {
                    HandlerError::BadMessage(format!("unparseable block size '{raw}'"))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_BLOCK_SIZE)
            .max(1);

        let transactions = self
            .store
            .list_range(from, to, MAX_BATCH)
            .await
            .map_err(store_error)?;
        let total = transactions.len();

        for block in transactions.chunks(block_size) {
            let mut per_tenant: HashMap<TenantId, Vec<_>> = HashMap::new();
            for txn in block {
                per_tenant.entry(txn.tenant.clone()).or_default().push(txn.id);
            }
            for (tenant, tx_ids) in per_tenant {
                self.engine
                    .reindex(&tenant, &ReindexRequest::full(tx_ids))
                    .await
                    .map_err(engine_error)?;
            }
        }

        tracing::info!(%from, %to, total, "range reindex complete");
        self.tracker
            .succeed(
                message,
                HashMap::from([("txns".to_string(), serde_json::json!(total))]),
            )
            .await;
        Ok(())
    }
}

/// `solr-sync`: reconcile the index against committed transactions it has
/// not caught up with, marking each one indexed afterwards.
pub struct SolrSyncHandler<S: AsyncOperationStore> {
    engine: Arc<dyn IndexEngine>,
    store: Arc<dyn TransactionStore>,
    tracker: TaskTracker<S>,
}

impl<S: AsyncOperationStore> SolrSyncHandler<S> {
    pub fn new(
        engine: Arc<dyn IndexEngine>,
        store: Arc<dyn TransactionStore>,
        async_ops: AsyncOperationService<S>,
    ) -> Self {
        Self {
            engine,
            store,
            tracker: TaskTracker { async_ops },
        }
    }
}

#[async_trait]
impl<S: AsyncOperationStore> MessageHandler for SolrSyncHandler<S> {
    fn requires_trace(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        message: &Message,
        _identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        let lagging = self
            .store
            .list_unindexed(RECONCILE_LIMIT)
            .await
            .map_err(store_error)?;
        let total = lagging.len();

        for txn in lagging {
            self.engine
                .reindex(&txn.tenant, &ReindexRequest::full(vec![txn.id]))
                .await
                .map_err(engine_error)?;
            self.store
                .mark_indexed(txn.id, Utc::now())
                .await
                .map_err(store_error)?;
        }

        metrics::counter!("index_reconciled").increment(total as u64);
        self.tracker
            .succeed(
                message,
                HashMap::from([("reconciled".to_string(), serde_json::json!(total))]),
            )
            .await;
        Ok(())
    }
}

/// `tx-clean`: purge indexed transaction records older than a cutoff.
pub struct TxCleanHandler<S: AsyncOperationStore> {
    store: Arc<dyn TransactionStore>,
    tracker: TaskTracker<S>,
}

impl<S: AsyncOperationStore> TxCleanHandler<S> {
    pub fn new(store: Arc<dyn TransactionStore>, async_ops: AsyncOperationService<S>) -> Self {
        Self {
            store,
            tracker: TaskTracker { async_ops },
        }
    }
}

#[async_trait]
impl<S: AsyncOperationStore> MessageHandler for TxCleanHandler<S> {
    fn requires_trace(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        message: &Message,
        _identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        let cutoff = parse_time(message, attr::BEFORE)?;
        let purged = self.store.purge_before(cutoff).await.map_err(store_error)?;
        tracing::info!(%cutoff, purged, "transaction records purged");
        self.tracker
            .succeed(
                message,
                HashMap::from([("purged".to_string(), serde_json::json!(purged))]),
            )
            .await;
        Ok(())
    }
}

/// `nodes-clean`: remove entity records no longer referenced by any
/// transaction of the effective tenant.
pub struct NodesCleanHandler<S: AsyncOperationStore> {
    store: Arc<dyn TransactionStore>,
    tracker: TaskTracker<S>,
}

impl<S: AsyncOperationStore> NodesCleanHandler<S> {
    pub fn new(store: Arc<dyn TransactionStore>, async_ops: AsyncOperationService<S>) -> Self {
        Self {
            store,
            tracker: TaskTracker { async_ops },
        }
    }
}

#[async_trait]
impl<S: AsyncOperationStore> MessageHandler for NodesCleanHandler<S> {
    fn requires_trace(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        message: &Message,
        identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        let identity = identity_of(identity)?;
        let purged = self
            .store
            .purge_orphans(&identity.tenant)
            .await
            .map_err(store_error)?;
        tracing::info!(tenant = %identity.tenant, purged, "orphaned entity records purged");
        self.tracker
            .succeed(
                message,
                HashMap::from([("purged".to_string(), serde_json::json!(purged))]),
            )
            .await;
        Ok(())
    }
}

/// `calc-volumes`: recompute the stored byte volume of the effective tenant.
pub struct CalcVolumesHandler<S: AsyncOperationStore> {
    content: Arc<dyn ContentStore>,
    tracker: TaskTracker<S>,
}

impl<S: AsyncOperationStore> CalcVolumesHandler<S> {
    pub fn new(content: Arc<dyn ContentStore>, async_ops: AsyncOperationService<S>) -> Self {
        Self {
            content,
            tracker: TaskTracker { async_ops },
        }
    }
}

#[async_trait]
impl<S: AsyncOperationStore> MessageHandler for CalcVolumesHandler<S> {
    fn requires_trace(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        message: &Message,
        identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        let identity = identity_of(identity)?;
        let volume = self
            .content
            .tenant_volume(&identity.tenant)
            .await
            .map_err(store_error)?;
        metrics::gauge!("tenant_volume_bytes", "tenant" => identity.tenant.to_string())
            .set(volume as f64);
        self.tracker
            .succeed(
                message,
                HashMap::from([("volumeBytes".to_string(), serde_json::json!(volume))]),
            )
            .await;
        Ok(())
    }
}

/// `link`: create a link between two entities.
pub struct LinkHandler {
    links: Arc<dyn LinkWriter>,
}

impl LinkHandler {
    pub fn new(links: Arc<dyn LinkWriter>) -> Self {
        Self { links }
    }
}

#[async_trait]
impl MessageHandler for LinkHandler {
    async fn handle(
        &self,
        message: &Message,
        identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        let identity = identity_of(identity)?;
        let from = parse_uuid(message, attr::FROM)?;
        let to = parse_uuid(message, attr::TO)?;
        let link_type = required(message, attr::LINK_TYPE)?;
        self.links
            .create_link(identity, from, to, link_type)
            .await
            .map_err(engine_error)
    }
}

/// `multi-node`: run one named action over a set of entities.
pub struct MultiNodeHandler<S: AsyncOperationStore> {
    batches: Arc<dyn BatchRunner>,
    tracker: TaskTracker<S>,
}

impl<S: AsyncOperationStore> MultiNodeHandler<S> {
    pub fn new(batches: Arc<dyn BatchRunner>, async_ops: AsyncOperationService<S>) -> Self {
        Self {
            batches,
            tracker: TaskTracker { async_ops },
        }
    }
}

#[async_trait]
impl<S: AsyncOperationStore> MessageHandler for MultiNodeHandler<S> {
    fn requires_trace(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        message: &Message,
        identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        let identity = identity_of(identity)?;
        let action = required(message, attr::ACTION)?;
        let nodes = required(message, attr::NODES)?
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<Uuid>().map_err(|_| {
                    HandlerError::BadMessage(format!("unparseable uuid '{s}' in node set"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if nodes.is_empty() {
            return Err(HandlerError::BadMessage("empty node set".to_string()));
        }
        self.batches
            .run(identity, action, &nodes)
            .await
            .map_err(engine_error)?;
        self.tracker
            .succeed(
                message,
                HashMap::from([("nodes".to_string(), serde_json::json!(nodes.len()))]),
            )
            .await;
        Ok(())
    }
}

/// `event`: distributed repository event; observed, not acted on here.
pub struct EventHandler;

#[async_trait]
impl MessageHandler for EventHandler {
    fn requires_identity(&self) -> bool {
        false
    }

    async fn handle(
        &self,
        message: &Message,
        _identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        tracing::debug!(
            tenant = message.property(properties::TENANT).unwrap_or("-"),
            "repository event observed"
        );
        metrics::counter!("repo_events_observed").increment(1);
        Ok(())
    }
}

/// `trace`: round-trip probe marking its own tracked operation successful.
pub struct TraceHandler<S: AsyncOperationStore> {
    async_ops: AsyncOperationService<S>,
}

impl<S: AsyncOperationStore> TraceHandler<S> {
    pub fn new(async_ops: AsyncOperationService<S>) -> Self {
        Self { async_ops }
    }
}

#[async_trait]
impl<S: AsyncOperationStore> MessageHandler for TraceHandler<S> {
    fn requires_identity(&self) -> bool {
        false
    }

    fn requires_trace(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        message: &Message,
        _identity: Option<&Identity>,
    ) -> Result<(), HandlerError> {
        let task_id = required(message, properties::TASK_ID).map(TaskId::new)?;
        let attributes = HashMap::from([(
            "processedAt".to_string(),
            serde_json::json!(Utc::now().to_rfc3339()),
        )]);
        self.async_ops
            .complete_task(&task_id, TaskStatus::Success, attributes)
            .await
            .map_err(|e| match e {
                AsyncOpError::TaskNotFound(_) => HandlerError::Client(e.to_string()),
                AsyncOpError::PreconditionFailed { .. } => HandlerError::Client(e.to_string()),
                other => HandlerError::Server(other.to_string()),
            })?;
        Ok(())
    }
}

/// Registers the full routing table on a dispatcher.
#[allow(clippy::too_many_arguments)]
pub fn register_handlers<S>(
    dispatcher: &mut Dispatcher<S>,
    engine: Arc<dyn IndexEngine>,
    store: Arc<dyn TransactionStore>,
    content: Arc<dyn ContentStore>,
    links: Arc<dyn LinkWriter>,
    batches: Arc<dyn BatchRunner>,
    async_ops: AsyncOperationService<S>,
) where
    S: AsyncOperationStore + Clone + 'static,
{
    dispatcher.register(
        message_types::REINDEX,
        Box::new(ReindexHandler::new(Arc::clone(&engine), async_ops.clone())),
    );
    dispatcher.register(
        message_types::REINDEX_RANGE,
        Box::new(ReindexRangeHandler::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            async_ops.clone(),
        )),
    );
    dispatcher.register(
        message_types::SOLR_SYNC,
        Box::new(SolrSyncHandler::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            async_ops.clone(),
        )),
    );
    dispatcher.register(
        message_types::TX_CLEAN,
        Box::new(TxCleanHandler::new(Arc::clone(&store), async_ops.clone())),
    );
    dispatcher.register(
        message_types::NODES_CLEAN,
        Box::new(NodesCleanHandler::new(store, async_ops.clone())),
    );
    dispatcher.register(
        message_types::CALC_VOLUMES,
        Box::new(CalcVolumesHandler::new(content, async_ops.clone())),
    );
    dispatcher.register(message_types::LINK, Box::new(LinkHandler::new(links)));
    dispatcher.register(
        message_types::MULTI_NODE,
        Box::new(MultiNodeHandler::new(batches, async_ops.clone())),
    );
    dispatcher.register(message_types::EVENT, Box::new(EventHandler));
    dispatcher.register(message_types::TRACE, Box::new(TraceHandler::new(async_ops)));
}
