use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::TaskId;

use crate::{AsyncOpError, AsyncOperation, Result, store::AsyncOperationStore};

/// In-memory async-operation store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAsyncOperationStore {
    records: Arc<RwLock<HashMap<TaskId, AsyncOperation>>>,
}

impl InMemoryAsyncOperationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }
}

#[async_trait]
impl AsyncOperationStore for InMemoryAsyncOperationStore {
    async fn insert(&self, operation: &AsyncOperation) -> Result<()> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&operation.task_id) {
            return Err(AsyncOpError::DuplicateTask(operation.task_id.clone()));
        }
        records.insert(operation.task_id.clone(), operation.clone());
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<AsyncOperation>> {
        Ok(self.records.read().unwrap().get(task_id).cloned())
    }

    async fn update(&self, operation: &AsyncOperation) -> Result<()> {
        let mut records = self.records.write().unwrap();
        if !records.contains_key(&operation.task_id) {
            return Err(AsyncOpError::TaskNotFound(operation.task_id.clone()));
        }
        records.insert(operation.task_id.clone(), operation.clone());
        Ok(())
    }

    async fn remove(&self, task_id: &TaskId) -> Result<()> {
        self.records
            .write()
            .unwrap()
            .remove(task_id)
            .map(|_| ())
            .ok_or_else(|| AsyncOpError::TaskNotFound(task_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TenantId;

    fn op(id: &str) -> AsyncOperation {
        AsyncOperation::submitted(TenantId::new("acme"), TaskId::new(id), HashMap::new())
    }

    #[tokio::test]
    async fn insert_get_remove() {
        let store = InMemoryAsyncOperationStore::new();
        store.insert(&op("t1")).await.unwrap();

        let found = store.get(&TaskId::new("t1")).await.unwrap().unwrap();
        assert_eq!(found.task_id, TaskId::new("t1"));

        store.remove(&TaskId::new("t1")).await.unwrap();
        assert!(store.get(&TaskId::new("t1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = InMemoryAsyncOperationStore::new();
        store.insert(&op("t1")).await.unwrap();
        assert!(matches!(
            store.insert(&op("t1")).await,
            Err(AsyncOpError::DuplicateTask(_))
        ));
    }

    #[tokio::test]
    async fn update_missing_rejected() {
        let store = InMemoryAsyncOperationStore::new();
        assert!(matches!(
            store.update(&op("t1")).await,
            Err(AsyncOpError::TaskNotFound(_))
        ));
    }
}
