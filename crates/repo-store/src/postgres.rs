use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{TenantId, TxnId, TxnUuid};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ApplicationTransaction, Result, StoreError,
    store::{StoreTransaction, TransactionStore},
};

/// PostgreSQL-backed transaction store.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
    schema_version: i64,
}

impl PostgresTransactionStore {
    /// Creates a new store over an existing connection pool.
    pub fn new(pool: PgPool, schema_version: i64) -> Self {
        Self {
            pool,
            schema_version,
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_transaction(row: PgRow) -> Result<ApplicationTransaction> {
        Ok(ApplicationTransaction {
            id: TxnId::new(row.try_get("id")?),
            tenant: TenantId::new(row.try_get::<String, _>("tenant")?),
            uuid: TxnUuid::from_uuid(row.try_get::<Uuid, _>("uuid")?),
            created_at: row.try_get("created_at")?,
            indexed_at: row.try_get("indexed_at")?,
            schema_version: row.try_get("schema_version")?,
        })
    }
}

const TXN_COLUMNS: &str = "id, tenant, uuid, created_at, indexed_at, schema_version";

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction {
            tx: Some(tx),
            schema_version: self.schema_version,
        }))
    }

    async fn get(&self, id: TxnId) -> Result<Option<ApplicationTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TXN_COLUMNS} FROM repo_transactions WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn list_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ApplicationTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TXN_COLUMNS} FROM repo_transactions \
             WHERE created_at >= $1 AND created_at <= $2 \
             ORDER BY created_at ASC, id ASC LIMIT $3"
        ))
        .bind(from)
        .bind(to)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn list_unindexed(&self, limit: usize) -> Result<Vec<ApplicationTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TXN_COLUMNS} FROM repo_transactions \
             WHERE indexed_at IS NULL ORDER BY id ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn mark_indexed(&self, id: TxnId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE repo_transactions SET indexed_at = $2 WHERE id = $1")
            .bind(id.as_i64())
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TransactionNotFound(id));
        }
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM repo_transactions WHERE created_at < $1 AND indexed_at IS NOT NULL",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_orphans(&self, tenant: &TenantId) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM repo_nodes WHERE tenant = $1 \
             AND txn_id NOT IN (SELECT id FROM repo_transactions)",
        )
        .bind(tenant.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

struct PgStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    schema_version: i64,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn create_transaction(&mut self, tenant: &TenantId) -> Result<ApplicationTransaction> {
        let tx = self.tx.as_mut().ok_or(StoreError::TransactionCompleted)?;
        let uuid = TxnUuid::new();

        let row = sqlx::query(
            "INSERT INTO repo_transactions (tenant, uuid, created_at, schema_version) \
             VALUES ($1, $2, now(), $3) \
             RETURNING id, created_at",
        )
        .bind(tenant.as_str())
        .bind(uuid.as_uuid())
        .bind(self.schema_version)
        .fetch_one(&mut **tx)
        .await?;

        Ok(ApplicationTransaction {
            id: TxnId::new(row.try_get("id")?),
            tenant: tenant.clone(),
            uuid,
            created_at: row.try_get("created_at")?,
            indexed_at: None,
            schema_version: self.schema_version,
        })
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or(StoreError::TransactionCompleted)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or(StoreError::TransactionCompleted)?;
        tx.rollback().await?;
        Ok(())
    }
}
