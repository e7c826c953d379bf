//! Submit/poll/complete semantics over the operation store.

use std::collections::HashMap;

use chrono::Utc;
use common::{DeliveryId, Message, TaskId, TenantId, properties};

use crate::{
    AsyncOpError, AsyncOperation, Result, TaskStatus, sender::MessageSender,
    store::AsyncOperationStore,
};

/// Result of [`AsyncOperationService::submit`].
///
/// When enqueueing fails the outcome is returned synchronously with a
/// terminal `Failed` status instead of surfacing the producer error.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Registered task id, when tracing was requested.
    pub task_id: Option<TaskId>,
    /// `Submitted` on success, `Failed` when the enqueue failed.
    pub status: TaskStatus,
    /// Broker delivery id on success.
    pub delivery: Option<DeliveryId>,
    /// Enqueue error message on failure.
    pub error: Option<String>,
}

/// Service guarding async-operation state transitions.
///
/// All writes go through the store's own connections; registration survives
/// even if the caller's enclosing business transaction later aborts.
#[derive(Debug, Clone)]
pub struct AsyncOperationService<S: AsyncOperationStore> {
    store: S,
}

impl<S: AsyncOperationStore> AsyncOperationService<S> {
    /// Creates a new service over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Registers a new operation in status `Submitted`.
    #[tracing::instrument(skip(self, attributes))]
    pub async fn register_task(
        &self,
        tenant: &TenantId,
        task_id: &TaskId,
        attributes: HashMap<String, serde_json::Value>,
    ) -> Result<AsyncOperation> {
        let operation = AsyncOperation::submitted(tenant.clone(), task_id.clone(), attributes);
        self.store.insert(&operation).await?;
        metrics::counter!("async_ops_registered").increment(1);
        Ok(operation)
    }

    /// Marks a submitted operation as running.
    pub async fn start_task(&self, task_id: &TaskId) -> Result<AsyncOperation> {
        let mut operation = self.load(task_id).await?;
        if operation.status != TaskStatus::Submitted {
            return Err(AsyncOpError::PreconditionFailed {
                task_id: task_id.clone(),
                status: operation.status,
            });
        }
        operation.status = TaskStatus::Running;
        operation.updated_at = Utc::now();
        self.store.update(&operation).await?;
        Ok(operation)
    }

    /// Completes an operation with a terminal status, merging the supplied
    /// attributes into the stored feedback.
    ///
    /// Allowed only from `Submitted` or `Running`; completing an already
    /// terminal operation fails without touching stored state.
    #[tracing::instrument(skip(self, attributes))]
    pub async fn complete_task(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        attributes: HashMap<String, serde_json::Value>,
    ) -> Result<AsyncOperation> {
        if !status.is_terminal() {
            return Err(AsyncOpError::NotTerminal(status));
        }
        let mut operation = self.load(task_id).await?;
        if operation.status.is_terminal() {
            return Err(AsyncOpError::PreconditionFailed {
                task_id: task_id.clone(),
                status: operation.status,
            });
        }
        operation.status = status;
        operation.attributes.extend(attributes);
        operation.updated_at = Utc::now();
        self.store.update(&operation).await?;
        metrics::counter!("async_ops_completed", "status" => status.as_str()).increment(1);
        Ok(operation)
    }

    /// Looks up an operation by id.
    pub async fn get_task(&self, task_id: &TaskId) -> Result<Option<AsyncOperation>> {
        self.store.get(task_id).await
    }

    /// Removes a terminal operation.
    ///
    /// The optional `filter` sees the current record and can veto removal by
    /// returning false; a veto and a non-terminal status both raise a
    /// precondition failure.
    pub async fn remove_task<F>(&self, task_id: &TaskId, filter: Option<F>) -> Result<()>
    where
        F: Fn(&AsyncOperation) -> bool,
    {
        let operation = self.load(task_id).await?;
        if !operation.status.is_terminal() {
            return Err(AsyncOpError::PreconditionFailed {
                task_id: task_id.clone(),
                status: operation.status,
            });
        }
        if let Some(filter) = filter
            && !filter(&operation)
        {
            return Err(AsyncOpError::PreconditionFailed {
                task_id: task_id.clone(),
                status: operation.status,
            });
        }
        self.store.remove(task_id).await
    }

    /// Composes message creation with optional task registration.
    ///
    /// With `trace_required` a fresh task is registered and its id attached
    /// to the message. When the enqueue fails the registration is rolled back
    /// and a terminal `Failed` handle is returned instead of an error.
    #[tracing::instrument(skip(self, sender, message, attributes))]
    pub async fn submit<M: MessageSender>(
        &self,
        sender: &M,
        destination: &str,
        mut message: Message,
        tenant: &TenantId,
        trace_required: bool,
        attributes: HashMap<String, serde_json::Value>,
    ) -> Result<SubmitOutcome> {
        let task_id = if trace_required {
            let task_id = TaskId::random();
            self.register_task(tenant, &task_id, attributes).await?;
            message
                .properties
                .insert(properties::TASK_ID.to_string(), task_id.to_string());
            Some(task_id)
        } else {
            None
        };

        match sender.send(destination, message).await {
            Ok(delivery) => Ok(SubmitOutcome {
                task_id,
                status: TaskStatus::Submitted,
                delivery: Some(delivery),
                error: None,
            }),
            Err(e) => {
                tracing::warn!(%destination, error = %e, "enqueue failed, rolling back task");
                if let Some(ref task_id) = task_id {
                    // Best effort; the record is useless without a message.
                    if let Err(remove_err) = self.store.remove(task_id).await {
                        tracing::warn!(%task_id, error = %remove_err, "task rollback failed");
                    }
                }
                metrics::counter!("async_ops_submit_failures").increment(1);
                Ok(SubmitOutcome {
                    task_id: None,
                    status: TaskStatus::Failed,
                    delivery: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    async fn load(&self, task_id: &TaskId) -> Result<AsyncOperation> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| AsyncOpError::TaskNotFound(task_id.clone()))
    }
}
