use common::TaskId;
use thiserror::Error;

use crate::operation::TaskStatus;

/// Errors raised by the async-operation service.
#[derive(Debug, Error)]
pub enum AsyncOpError {
    /// The operation is not in a state that allows the requested transition.
    #[error("Precondition failed for task {task_id}: current status is {status}")]
    PreconditionFailed { task_id: TaskId, status: TaskStatus },

    /// The requested target status is not a terminal one.
    #[error("Completion status must be terminal, got {0}")]
    NotTerminal(TaskStatus),

    /// No operation is registered under the id.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// An operation is already registered under the id.
    #[error("Task already registered: {0}")]
    DuplicateTask(TaskId),

    /// A stored status string could not be parsed.
    #[error("Unknown task status: {0}")]
    UnknownStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for async-operation calls.
pub type Result<T> = std::result::Result<T, AsyncOpError>;
