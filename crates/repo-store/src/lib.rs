pub mod content;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod transaction;

pub use content::{ContentStore, InMemoryContentStore};
pub use error::{Result, StoreError};
pub use memory::InMemoryTransactionStore;
pub use postgres::PostgresTransactionStore;
pub use store::{StoreTransaction, TransactionStore};
pub use transaction::ApplicationTransaction;
