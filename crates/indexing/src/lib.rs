//! Index coordination for the repository core.
//!
//! The index engine itself sits behind a seam; this crate owns the reindex
//! task value and its wire mapping, the coordinator that drives synchronous
//! and queued reindexing, and the message handlers the dispatcher routes to.

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod flags;
pub mod handlers;
pub mod task;

pub use coordinator::IndexCoordinator;
pub use engine::{InMemoryIndexEngine, IndexEngine, ReindexOutcome, ReindexRequest};
pub use error::{IndexingError, Result};
pub use flags::ReindexFlags;
pub use handlers::{
    BatchRunner, CalcVolumesHandler, EventHandler, LinkHandler, LinkWriter, MultiNodeHandler,
    NodesCleanHandler, ReindexHandler, ReindexRangeHandler, SolrSyncHandler, TraceHandler,
    TxCleanHandler, register_handlers,
};
pub use task::ReindexTask;
