//! Type-routed dispatch of inbound messages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use async_ops::{AsyncOpError, AsyncOperationService, AsyncOperationStore, TaskStatus};
use common::{Identity, IdentityProvider, Message, TaskId, properties};

use crate::error::HandlerError;

/// What the consumer loop should do with a delivery after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge the message; it is done (or deliberately dropped).
    Ack,
    /// Leave the message unacknowledged so the broker redelivers it.
    Retry,
}

/// One routed message handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Whether the dispatcher must resolve an effective identity before
    /// invoking this handler.
    fn requires_identity(&self) -> bool {
        true
    }

    /// Whether messages for this handler carry completion tracking: a
    /// handler failure on a message with a task id becomes a terminal
    /// `Failed` async-operation record instead of a redelivery.
    fn requires_trace(&self) -> bool {
        false
    }

    /// Processes one message.
    async fn handle(
        &self,
        message: &Message,
        identity: Option<&Identity>,
    ) -> Result<(), HandlerError>;
}

/// Routes inbound messages by their type tag to a fixed handler set.
pub struct Dispatcher<S: AsyncOperationStore> {
    handlers: HashMap<String, Box<dyn MessageHandler>>,
    identity_provider: Arc<dyn IdentityProvider>,
    async_ops: AsyncOperationService<S>,
}

impl<S: AsyncOperationStore> Dispatcher<S> {
    /// Creates an empty dispatcher.
    pub fn new(
        identity_provider: Arc<dyn IdentityProvider>,
        async_ops: AsyncOperationService<S>,
    ) -> Self {
        Self {
            handlers: HashMap::new(),
            identity_provider,
            async_ops,
        }
    }

    /// Registers the handler for a message type.
    pub fn register(&mut self, message_type: impl Into<String>, handler: Box<dyn MessageHandler>) {
        self.handlers.insert(message_type.into(), handler);
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatches one message and classifies the outcome for the consumer.
    #[tracing::instrument(skip(self, message), fields(message_type = %message.message_type))]
    pub async fn dispatch(&self, message: &Message) -> Disposition {
        match self.route(message).await {
            Ok(()) => {
                metrics::counter!("dispatch_handled").increment(1);
                Disposition::Ack
            }
            Err(HandlerError::BadMessage(reason)) => {
                tracing::warn!(%reason, "dropping bad message");
                metrics::counter!("dispatch_dropped", "kind" => "bad").increment(1);
                Disposition::Ack
            }
            Err(HandlerError::Client(reason)) => {
                tracing::warn!(%reason, "dropping message after client error");
                metrics::counter!("dispatch_dropped", "kind" => "client").increment(1);
                Disposition::Ack
            }
            Err(HandlerError::Server(reason)) => {
                tracing::error!(%reason, "handler failed, leaving message for redelivery");
                metrics::counter!("dispatch_retried").increment(1);
                Disposition::Retry
            }
        }
    }

    async fn route(&self, message: &Message) -> Result<(), HandlerError> {
        let handler = self.handlers.get(&message.message_type).ok_or_else(|| {
            HandlerError::BadMessage(format!("unroutable type '{}'", message.message_type))
        })?;

        let identity = if handler.requires_identity() {
            Some(self.resolve_identity(message).await?)
        } else {
            None
        };

        let task_id = message
            .property(properties::TASK_ID)
            .filter(|_| handler.requires_trace())
            .map(TaskId::new);

        let result = handler.handle(message, identity.as_ref()).await;

        if let Some(task_id) = task_id
            && let Err(ref e) = result
        {
            // Tracked work must reach a terminal state exactly once; the
            // failure is recorded instead of re-thrown.
            self.record_failure(&task_id, e).await;
            return Ok(());
        }

        result
    }

    async fn record_failure(&self, task_id: &TaskId, error: &HandlerError) {
        let attributes = HashMap::from([(
            "error".to_string(),
            serde_json::Value::String(error.to_string()),
        )]);
        match self
            .async_ops
            .complete_task(task_id, TaskStatus::Failed, attributes)
            .await
        {
            Ok(_) => {}
            Err(AsyncOpError::PreconditionFailed { .. }) => {
                // Already terminal; the handler completed it before failing.
                tracing::debug!(%task_id, "task already terminal, skipping failure record");
            }
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "failed to record task failure");
            }
        }
    }

    async fn resolve_identity(&self, message: &Message) -> Result<Identity, HandlerError> {
        if let Some(authority) = message.property(properties::AUTHORITY) {
            return self
                .identity_provider
                .resolve_authority(authority)
                .await
                .map_err(|e| HandlerError::BadMessage(e.to_string()));
        }
        if let Some(tenant) = message.property(properties::TENANT) {
            // Tenant-only messages run as that tenant's administrator.
            return self
                .identity_provider
                .resolve_tenant(tenant)
                .await
                .map_err(|e| HandlerError::BadMessage(e.to_string()));
        }
        Err(HandlerError::BadMessage(
            "message carries neither authority nor tenant".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_ops::InMemoryAsyncOperationStore;
    use common::{StaticIdentityProvider, TenantId, message_types};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingHandler {
        calls: Arc<AtomicU32>,
        requires_identity: bool,
        requires_trace: bool,
        fail_with: Option<fn() -> HandlerError>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        fn requires_identity(&self) -> bool {
            self.requires_identity
        }

        fn requires_trace(&self) -> bool {
            self.requires_trace
        }

        async fn handle(
            &self,
            _message: &Message,
            identity: Option<&Identity>,
        ) -> Result<(), HandlerError> {
            if self.requires_identity {
                assert!(identity.is_some());
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }
    }

    fn dispatcher() -> (
        Dispatcher<InMemoryAsyncOperationStore>,
        AsyncOperationService<InMemoryAsyncOperationStore>,
    ) {
        let store = InMemoryAsyncOperationStore::new();
        let service = AsyncOperationService::new(store.clone());
        let dispatcher = Dispatcher::new(
            Arc::new(StaticIdentityProvider::new()),
            AsyncOperationService::new(store),
        );
        (dispatcher, service)
    }

    fn handler(
        calls: &Arc<AtomicU32>,
        trace: bool,
        fail_with: Option<fn() -> HandlerError>,
    ) -> Box<RecordingHandler> {
        Box::new(RecordingHandler {
            calls: Arc::clone(calls),
            requires_identity: true,
            requires_trace: trace,
            fail_with,
        })
    }

    #[tokio::test]
    async fn unroutable_type_is_bad_message() {
        let (dispatcher, _) = dispatcher();
        let disposition = dispatcher
            .dispatch(&Message::new("nonsense").with_property(properties::TENANT, "acme"))
            .await;
        assert_eq!(disposition, Disposition::Ack);
    }

    #[tokio::test]
    async fn missing_identity_is_bad_message() {
        let (mut dispatcher, _) = dispatcher();
        let calls = Arc::new(AtomicU32::new(0));
        dispatcher.register(message_types::REINDEX, handler(&calls, false, None));

        let disposition = dispatcher.dispatch(&Message::new(message_types::REINDEX)).await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tenant_property_resolves_admin_identity() {
        let (mut dispatcher, _) = dispatcher();
        let calls = Arc::new(AtomicU32::new(0));
        dispatcher.register(message_types::REINDEX, handler(&calls, false, None));

        let disposition = dispatcher
            .dispatch(
                &Message::new(message_types::REINDEX).with_property(properties::TENANT, "acme"),
            )
            .await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_requests_redelivery() {
        let (mut dispatcher, _) = dispatcher();
        let calls = Arc::new(AtomicU32::new(0));
        dispatcher.register(
            message_types::REINDEX,
            handler(&calls, false, Some(|| HandlerError::Server("index down".to_string()))),
        );

        let disposition = dispatcher
            .dispatch(
                &Message::new(message_types::REINDEX).with_property(properties::TENANT, "acme"),
            )
            .await;
        assert_eq!(disposition, Disposition::Retry);
    }

    #[tokio::test]
    async fn client_error_is_dropped() {
        let (mut dispatcher, _) = dispatcher();
        let calls = Arc::new(AtomicU32::new(0));
        dispatcher.register(
            message_types::REINDEX,
            handler(&calls, false, Some(|| HandlerError::Client("no such node".to_string()))),
        );

        let disposition = dispatcher
            .dispatch(
                &Message::new(message_types::REINDEX).with_property(properties::TENANT, "acme"),
            )
            .await;
        assert_eq!(disposition, Disposition::Ack);
    }

    #[tokio::test]
    async fn traced_failure_records_exactly_one_terminal_failed() {
        let (mut dispatcher, service) = dispatcher();
        let tenant = TenantId::new("acme");
        let task_id = TaskId::new("t-trace");
        service
            .register_task(&tenant, &task_id, HashMap::new())
            .await
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        dispatcher.register(
            message_types::REINDEX,
            handler(&calls, true, Some(|| HandlerError::Server("boom".to_string()))),
        );

        let message = Message::new(message_types::REINDEX)
            .with_property(properties::TENANT, "acme")
            .with_property(properties::TASK_ID, "t-trace");

        // Converted to a FAILED record, so the message is acked, not retried.
        let disposition = dispatcher.dispatch(&message).await;
        assert_eq!(disposition, Disposition::Ack);

        let task = service.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.attributes.get("error").and_then(|v| v.as_str()),
            Some("Server error: boom")
        );

        // A redelivered duplicate must not produce a second completion.
        let disposition = dispatcher.dispatch(&message).await;
        assert_eq!(disposition, Disposition::Ack);
        let task = service.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn untraced_task_id_does_not_complete() {
        let (mut dispatcher, service) = dispatcher();
        let tenant = TenantId::new("acme");
        let task_id = TaskId::new("t1");
        service
            .register_task(&tenant, &task_id, HashMap::new())
            .await
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        dispatcher.register(
            message_types::REINDEX,
            handler(&calls, false, Some(|| HandlerError::Server("boom".to_string()))),
        );

        let message = Message::new(message_types::REINDEX)
            .with_property(properties::TENANT, "acme")
            .with_property(properties::TASK_ID, "t1");
        let disposition = dispatcher.dispatch(&message).await;

        assert_eq!(disposition, Disposition::Retry);
        let task = service.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Submitted);
    }
}
