use std::time::Duration;

use thiserror::Error;

/// Errors raised by the transaction coordinator.
#[derive(Debug, Error)]
pub enum TxnError {
    /// The unit of work exceeded its execution-context timeout.
    #[error("Unit of work timed out after {0:?}")]
    Timeout(Duration),

    /// The unit of work has already committed or aborted.
    #[error("Unit of work already finished")]
    Finished,

    /// The metadata store failed underneath the unit of work.
    #[error(transparent)]
    Store(#[from] repo_store::StoreError),

    /// Index maintenance failed on a path that must surface to the caller.
    #[error(transparent)]
    Indexing(#[from] indexing::IndexingError),

    /// Business-level failure raised inside a perform closure.
    #[error("Operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, TxnError>;
