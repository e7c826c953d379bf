//! Transactional unit-of-work coordination.
//!
//! A unit of work holds exactly one store transaction and a group of logical
//! transaction contexts. Work runs inside `perform` closures against an
//! explicit [`UnitOfWork`] handle; there is no ambient transaction state.
//! At commit the coordinator classifies every completed context into inline,
//! synchronous or queued index maintenance; on abort it compensates the
//! index and the content store.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod group;
pub mod mode;

pub use config::{ExecutionContext, TxnConfig};
pub use context::TransactionContext;
pub use coordinator::TransactionCoordinator;
pub use error::{Result, TxnError};
pub use group::{TransactionGroup, UnitOfWork};
pub use mode::{IndexingMode, PerformResult};
