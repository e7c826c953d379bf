use common::TxnId;
use thiserror::Error;

/// Errors raised by the metadata and content stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction record does not exist.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TxnId),

    /// The content address does not exist.
    #[error("Content not found: {0}")]
    ContentNotFound(String),

    /// The store transaction was already finished.
    #[error("Store transaction already completed")]
    TransactionCompleted,

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An I/O error occurred while reading or writing content.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend-specific failure, surfaced as-is.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
