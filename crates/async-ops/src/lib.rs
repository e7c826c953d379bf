//! Durable tracking of long-running asynchronous operations.
//!
//! An async operation is a pollable record of a task's status. Registration
//! and completion go through the store's own connections, independent of any
//! business transaction, so a caller's rollback never loses the record.

pub mod error;
pub mod memory;
pub mod operation;
pub mod postgres;
pub mod sender;
pub mod service;
pub mod store;

pub use error::{AsyncOpError, Result};
pub use memory::InMemoryAsyncOperationStore;
pub use operation::{AsyncOperation, TaskStatus};
pub use postgres::PostgresAsyncOperationStore;
pub use sender::{MessageSender, SendError};
pub use service::{AsyncOperationService, SubmitOutcome};
pub use store::AsyncOperationStore;
