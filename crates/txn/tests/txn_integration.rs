use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_ops::{MessageSender, SendError};
use async_trait::async_trait;
use common::{ContentUrl, DeliveryId, Identity, Message, TenantId, TxnId};
use indexing::{IndexCoordinator, InMemoryIndexEngine, ReindexTask};
use messaging::ConsumerConfig;
use repo_store::{InMemoryContentStore, InMemoryTransactionStore};
use txn::{
    ExecutionContext, IndexingMode, PerformResult, TransactionCoordinator, TxnConfig, TxnError,
};
use uuid::Uuid;

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, Message)>>,
}

impl RecordingSender {
    fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, destination: &str, message: Message) -> Result<DeliveryId, SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), message));
        Ok(DeliveryId::new())
    }
}

type Coordinator = TransactionCoordinator<
    InMemoryTransactionStore,
    InMemoryIndexEngine,
    RecordingSender,
    InMemoryContentStore,
>;

struct Fixture {
    coordinator: Coordinator,
    store: InMemoryTransactionStore,
    engine: InMemoryIndexEngine,
    sender: Arc<RecordingSender>,
    content: InMemoryContentStore,
}

fn fixture() -> Fixture {
    fixture_with(TxnConfig::default())
}

fn fixture_with(config: TxnConfig) -> Fixture {
    let store = InMemoryTransactionStore::new();
    let engine = InMemoryIndexEngine::new();
    let sender = Arc::new(RecordingSender::default());
    let content = InMemoryContentStore::new();
    let index = Arc::new(IndexCoordinator::new(
        Arc::new(engine.clone()),
        Arc::clone(&sender),
        ConsumerConfig::default(),
    ));
    let coordinator = TransactionCoordinator::new(
        Arc::new(store.clone()),
        index,
        Arc::new(content.clone()),
        config,
    );
    Fixture {
        coordinator,
        store,
        engine,
        sender,
        content,
    }
}

fn identity() -> Identity {
    Identity::user(TenantId::new("acme"), "alice")
}

#[tokio::test]
async fn nested_performs_open_exactly_one_store_transaction() {
    let f = fixture();
    let c = &f.coordinator;

    let value = c
        .perform_new(&identity(), |uow| async move {
            c.perform(&uow, |uow| async move {
                // Both inner calls join the context the outer one opened.
                c.perform(&uow, |uow| async move {
                    c.perform(&uow, |_| async move { Ok(PerformResult::of(1)) })
                        .await?;
                    Ok(PerformResult::of(2))
                })
                .await
                .map(PerformResult::of)
            })
            .await
        })
        .await
        .unwrap();

    assert_eq!(value, 2);
    assert_eq!(f.store.begun_count(), 1);
    // One logical transaction record, not three.
    assert_eq!(f.store.committed_count(), 1);
}

#[tokio::test]
async fn sibling_performs_share_the_store_transaction() {
    let f = fixture();
    let c = &f.coordinator;

    c.perform_new(&identity(), |uow| async move {
        c.perform(&uow, |_| async move {
            Ok(PerformResult::of(()).with_mode(IndexingMode::Async))
        })
        .await?;
        c.perform(&uow, |_| async move {
            Ok(PerformResult::of(()).with_mode(IndexingMode::Async))
        })
        .await?;
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(f.store.begun_count(), 1);
    assert_eq!(f.store.committed_count(), 2);
    // Async contexts of one tenant merge into a single queued task.
    let sent = f.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.property("tx"), Some("1,2"));
}

#[tokio::test]
async fn within_tx_indexes_inline_after_commit() {
    let f = fixture();
    let c = &f.coordinator;

    c.perform_new(&identity(), |uow| async move {
        c.perform(&uow, |_| async move {
            Ok(PerformResult::of(()).with_mode(IndexingMode::WithinTx))
        })
        .await
    })
    .await
    .unwrap();

    assert_eq!(f.engine.reindex_calls().len(), 1);
    assert!(f.sender.sent().is_empty());
}

#[tokio::test]
async fn disabled_inline_indexing_escalates_within_tx_to_queue() {
    let f = fixture();
    let c = &f.coordinator;

    c.perform_new(&identity(), |uow| async move {
        uow.disable_inline_indexing().await;
        c.perform(&uow, |_| async move {
            Ok(PerformResult::of(()).with_mode(IndexingMode::WithinTx))
        })
        .await
    })
    .await
    .unwrap();

    assert!(f.engine.reindex_calls().is_empty());
    assert_eq!(f.sender.sent().len(), 1);
}

#[tokio::test]
async fn small_sync_context_indexes_synchronously() {
    let f = fixture();
    let c = &f.coordinator;

    c.perform_new(&identity(), |uow| async move {
        c.perform(&uow, |_| async move {
            Ok(PerformResult::of(())
                .with_mode(IndexingMode::Sync)
                .with_row_count(10))
        })
        .await
    })
    .await
    .unwrap();

    let calls = f.engine.reindex_calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.include.is_none());
    assert!(f.sender.sent().is_empty());
}

#[tokio::test]
async fn oversized_sync_context_escalates_with_priority_entities_first() {
    let f = fixture();
    let c = &f.coordinator;
    let hot = Uuid::new_v4();

    c.perform_new(&identity(), |uow| async move {
        c.perform(&uow, |_| async move {
            Ok(PerformResult::of(())
                .with_mode(IndexingMode::Sync)
                .with_row_count(2000)
                .with_priority_uuids([hot]))
        })
        .await
    })
    .await
    .unwrap();

    // Priority entities went through synchronously, nothing else did.
    let calls = f.engine.reindex_calls();
    assert_eq!(calls.len(), 1);
    let include = calls[0].1.include.as_ref().unwrap();
    assert!(include.contains(&hot));

    // The whole transaction was queued once, at elevated priority.
    let sent = f.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "index.high");
    assert_eq!(sent[0].1.priority, Some(7));
}

#[tokio::test]
async fn unknown_row_count_escalates() {
    let f = fixture();
    let c = &f.coordinator;

    c.perform_new(&identity(), |uow| async move {
        c.perform(&uow, |_| async move {
            Ok(PerformResult::of(())
                .with_mode(IndexingMode::Sync)
                .with_row_count(-1))
        })
        .await
    })
    .await
    .unwrap();

    assert!(f.engine.reindex_calls().is_empty());
    assert_eq!(f.sender.sent().len(), 1);
}

#[tokio::test]
async fn sync_index_failure_escalates_instead_of_failing_the_commit() {
    let f = fixture();
    let c = &f.coordinator;
    f.engine.set_fail_reindex(1);

    c.perform_new(&identity(), |uow| async move {
        c.perform(&uow, |_| async move {
            Ok(PerformResult::of(())
                .with_mode(IndexingMode::Sync)
                .with_row_count(10))
        })
        .await
    })
    .await
    .unwrap();

    assert_eq!(f.sender.sent().len(), 1);
    assert_eq!(f.sender.sent()[0].1.priority, Some(7));
}

#[tokio::test]
async fn abort_deletes_every_created_url_exactly_once() {
    let f = fixture();
    let c = &f.coordinator;
    let a = ContentUrl::new("acme/objects/a");
    let b = ContentUrl::new("acme/objects/b");

    let result: Result<(), TxnError> = c
        .perform_new(&identity(), |uow| async move {
            c.perform(&uow, |uow| async move {
                uow.record_created(ContentUrl::new("acme/objects/a")).await;
                // Rewriting the same object must not double the cleanup.
                uow.record_created(ContentUrl::new("acme/objects/a")).await;
                uow.record_created(ContentUrl::new("acme/objects/b")).await;
                Err(TxnError::Operation("constraint violated".to_string()))
            })
            .await
        })
        .await;

    assert!(matches!(result, Err(TxnError::Operation(_))));
    assert_eq!(f.store.committed_count(), 0);
    assert_eq!(f.content.delete_attempts(&a), 1);
    assert_eq!(f.content.delete_attempts(&b), 1);
    // The open context's index entries were compensated.
    assert_eq!(f.engine.removals().len(), 1);
}

#[tokio::test]
async fn commit_failure_rolls_back_and_compensates() {
    let f = fixture();
    let c = &f.coordinator;
    f.store.set_fail_on_commit(true);

    let result: Result<(), TxnError> = c
        .perform_new(&identity(), |uow| async move {
            c.perform(&uow, |_| async move {
                Ok(PerformResult::of(()).with_mode(IndexingMode::WithinTx))
            })
            .await
        })
        .await;

    assert!(matches!(result, Err(TxnError::Store(_))));
    assert_eq!(f.store.committed_count(), 0);
    assert!(f.engine.reindex_calls().is_empty());
    assert_eq!(f.engine.removals().len(), 1);
    assert!(f.sender.sent().is_empty());
}

#[tokio::test]
async fn timeout_aborts_the_unit_of_work() {
    let config = TxnConfig {
        sync_timeout: Duration::from_millis(50),
        ..TxnConfig::default()
    };
    let f = fixture_with(config);
    let c = &f.coordinator;

    let result: Result<(), TxnError> = c
        .perform_new(&identity(), |uow| async move {
            c.perform(&uow, |_| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(PerformResult::of(()))
            })
            .await
        })
        .await;

    assert!(matches!(result, Err(TxnError::Timeout(_))));
    assert_eq!(f.store.committed_count(), 0);
}

#[tokio::test]
async fn async_execution_context_uses_the_long_budget() {
    let config = TxnConfig {
        sync_timeout: Duration::from_millis(10),
        async_timeout: Duration::from_secs(10),
        ..TxnConfig::default()
    };
    let f = fixture_with(config);
    let c = &f.coordinator;

    // Would blow the sync budget; fine under the async one.
    c.perform_new_in(&identity(), ExecutionContext::Async, |uow| async move {
        c.perform(&uow, |_| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(PerformResult::of(()))
        })
        .await
    })
    .await
    .unwrap();

    assert_eq!(f.store.committed_count(), 1);
}

#[tokio::test]
async fn deferred_reindex_is_submitted_after_commit() {
    let f = fixture();
    let c = &f.coordinator;

    c.perform_new(&identity(), |uow| async move {
        c.perform(&uow, |uow| async move {
            uow.defer_reindex(
                ReindexTask::new(TenantId::new("acme"), vec![TxnId::new(99)]).with_priority(2),
            )
            .await?;
            Ok(PerformResult::of(()))
        })
        .await
    })
    .await
    .unwrap();

    let sent = f.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.property("tx"), Some("99"));
}

#[tokio::test]
async fn impersonation_derives_without_touching_the_base_identity() {
    let f = fixture();
    let c = &f.coordinator;
    let base = identity();

    let seen = c
        .do_as_admin(&base, |admin| async move { admin })
        .await;
    assert!(seen.is_admin());
    assert_eq!(seen.tenant, base.tenant);

    let other = c
        .do_on_tenant(&base, TenantId::new("other"), |id| async move { id })
        .await;
    assert_eq!(other.tenant, TenantId::new("other"));
    assert!(other.is_admin());

    let temp = c.do_on_temp(|id| async move { id }).await;
    assert_eq!(temp.tenant, TenantId::new("-temp-"));

    // The base identity is still what the caller started with.
    assert_eq!(base.user, "alice");
}
