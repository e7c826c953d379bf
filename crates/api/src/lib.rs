//! Admin HTTP surface for the repository core.
//!
//! Exposes reindex submission, async-task inspection and cluster health
//! probes, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use async_ops::{AsyncOperationService, AsyncOperationStore, InMemoryAsyncOperationStore};
use async_trait::async_trait;
use axum::Router;
use axum::routing::{get, post};
use common::{Identity, StaticIdentityProvider};
use indexing::{BatchRunner, IndexEngine, InMemoryIndexEngine, LinkWriter, register_handlers};
use messaging::{
    ConsumerConfig, ConsumerPool, Dispatcher, InMemoryBroker, ProducerConfig, ReliableProducer,
};
use metrics_exporter_prometheus::PrometheusHandle;
use repo_store::{ContentStore, InMemoryContentStore, InMemoryTransactionStore, TransactionStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use config::Config;
use routes::admin::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: AsyncOperationStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/admin/reindex", post(routes::admin::reindex::<S>))
        .route(
            "/admin/tasks/{id}",
            get(routes::admin::get_task::<S>).delete(routes::admin::delete_task::<S>),
        )
        .route(
            "/admin/health/broadcast",
            post(routes::admin::health_broadcast::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Link and batch backend used by the single-node wiring.
///
/// Links live in the store proper; what this process owes the index is a
/// refresh of the touched subtrees, so both operations resolve to
/// subtree reindexing.
struct EngineMaintenance {
    engine: Arc<dyn IndexEngine>,
}

#[async_trait]
impl LinkWriter for EngineMaintenance {
    async fn create_link(
        &self,
        identity: &Identity,
        from: Uuid,
        to: Uuid,
        link_type: &str,
    ) -> indexing::Result<()> {
        tracing::debug!(%from, %to, link_type, "link created, refreshing endpoints");
        self.engine.reindex_subtree(&identity.tenant, from).await?;
        self.engine.reindex_subtree(&identity.tenant, to).await
    }
}

#[async_trait]
impl BatchRunner for EngineMaintenance {
    async fn run(
        &self,
        identity: &Identity,
        action: &str,
        nodes: &[Uuid],
    ) -> indexing::Result<()> {
        if action != "reindex" {
            return Err(indexing::IndexingError::Engine(format!(
                "unsupported batch action: {action}"
            )));
        }
        for node in nodes {
            self.engine.reindex_subtree(&identity.tenant, *node).await?;
        }
        Ok(())
    }
}

/// Creates the single-node application state over in-memory backends.
///
/// Starts the producer pool and the consumer pool; the caller shuts both
/// down when the server exits.
pub fn create_default_state() -> (
    Arc<AppState<InMemoryAsyncOperationStore>>,
    ConsumerPool,
    Arc<ReliableProducer>,
) {
    let broker = Arc::new(InMemoryBroker::new());
    let producer = Arc::new(ReliableProducer::start(
        Arc::clone(&broker),
        ProducerConfig::from_env(),
    ));
    let channels = ConsumerConfig::from_env();

    let async_ops = AsyncOperationService::new(InMemoryAsyncOperationStore::new());
    let engine: Arc<dyn IndexEngine> = Arc::new(InMemoryIndexEngine::new());
    let store: Arc<dyn TransactionStore> = Arc::new(InMemoryTransactionStore::new());
    let content: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    let maintenance = Arc::new(EngineMaintenance {
        engine: Arc::clone(&engine),
    });

    let mut dispatcher = Dispatcher::new(
        Arc::new(StaticIdentityProvider::new()),
        async_ops.clone(),
    );
    register_handlers(
        &mut dispatcher,
        engine,
        store,
        content,
        Arc::clone(&maintenance) as Arc<dyn LinkWriter>,
        maintenance,
        async_ops.clone(),
    );
    let pool = ConsumerPool::start(Arc::clone(&broker), Arc::new(dispatcher), channels.clone());

    let state = Arc::new(AppState {
        async_ops,
        producer: Arc::clone(&producer),
        broker,
        channels,
        config: Config::from_env(),
    });

    (state, pool, producer)
}
