use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use common::{TaskId, TenantId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    AsyncOpError, AsyncOperation, Result, TaskStatus, store::AsyncOperationStore,
};

/// PostgreSQL-backed async-operation store.
#[derive(Clone)]
pub struct PostgresAsyncOperationStore {
    pool: PgPool,
}

impl PostgresAsyncOperationStore {
    /// Creates a new store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_operation(row: PgRow) -> Result<AsyncOperation> {
        let attributes_json: serde_json::Value = row.try_get("attributes")?;
        let attributes: HashMap<String, serde_json::Value> =
            serde_json::from_value(attributes_json)?;

        Ok(AsyncOperation {
            tenant: TenantId::new(row.try_get::<String, _>("tenant")?),
            task_id: TaskId::new(row.try_get::<String, _>("task_id")?),
            status: TaskStatus::from_str(row.try_get::<String, _>("status")?.as_str())?,
            attributes,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl AsyncOperationStore for PostgresAsyncOperationStore {
    async fn insert(&self, operation: &AsyncOperation) -> Result<()> {
        let attributes = serde_json::to_value(&operation.attributes)?;

        sqlx::query(
            "INSERT INTO async_operations (task_id, tenant, status, attributes, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(operation.task_id.as_str())
        .bind(operation.tenant.as_str())
        .bind(operation.status.as_str())
        .bind(attributes)
        .bind(operation.created_at)
        .bind(operation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return AsyncOpError::DuplicateTask(operation.task_id.clone());
            }
            AsyncOpError::Database(e)
        })?;

        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<AsyncOperation>> {
        let row = sqlx::query(
            "SELECT task_id, tenant, status, attributes, created_at, updated_at \
             FROM async_operations WHERE task_id = $1",
        )
        .bind(task_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_operation).transpose()
    }

    async fn update(&self, operation: &AsyncOperation) -> Result<()> {
        let attributes = serde_json::to_value(&operation.attributes)?;

        let result = sqlx::query(
            "UPDATE async_operations \
             SET status = $2, attributes = $3, updated_at = $4 \
             WHERE task_id = $1",
        )
        .bind(operation.task_id.as_str())
        .bind(operation.status.as_str())
        .bind(attributes)
        .bind(operation.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AsyncOpError::TaskNotFound(operation.task_id.clone()));
        }
        Ok(())
    }

    async fn remove(&self, task_id: &TaskId) -> Result<()> {
        let result = sqlx::query("DELETE FROM async_operations WHERE task_id = $1")
            .bind(task_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AsyncOpError::TaskNotFound(task_id.clone()));
        }
        Ok(())
    }
}
