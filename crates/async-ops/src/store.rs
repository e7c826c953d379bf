use async_trait::async_trait;
use common::TaskId;

use crate::{AsyncOperation, Result};

/// Persistence seam for async-operation records.
///
/// Implementations use their own connections; a caller's open business
/// transaction never covers these writes. Transition guarding lives in the
/// service, the store is plain CRUD.
#[async_trait]
pub trait AsyncOperationStore: Send + Sync {
    /// Inserts a new record. Fails with `DuplicateTask` if the id is taken.
    async fn insert(&self, operation: &AsyncOperation) -> Result<()>;

    /// Looks up a record by task id.
    async fn get(&self, task_id: &TaskId) -> Result<Option<AsyncOperation>>;

    /// Replaces an existing record. Fails with `TaskNotFound` if absent.
    async fn update(&self, operation: &AsyncOperation) -> Result<()>;

    /// Removes a record. Fails with `TaskNotFound` if absent.
    async fn remove(&self, task_id: &TaskId) -> Result<()>;
}
