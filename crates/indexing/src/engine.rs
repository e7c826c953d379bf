//! Index engine seam.
//!
//! The search/index backend stays outside this workspace; the coordinator
//! and handlers drive it through this trait. The in-memory engine records
//! every call so tests can assert on what reached the index.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{TenantId, TxnId, TxnUuid};
use uuid::Uuid;

use crate::error::{IndexingError, Result};
use crate::flags::ReindexFlags;
use crate::task::ReindexTask;

/// One engine invocation: which transactions to index and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexRequest {
    pub tx_ids: Vec<TxnId>,
    pub flags: ReindexFlags,
    pub include: Option<BTreeSet<Uuid>>,
    pub exclude: Option<BTreeSet<Uuid>>,
    pub completed: bool,
    pub add_only: bool,
}

impl ReindexRequest {
    /// Full reindex of the given transactions.
    pub fn full(tx_ids: Vec<TxnId>) -> Self {
        Self {
            tx_ids,
            flags: ReindexFlags::default(),
            include: None,
            exclude: None,
            completed: true,
            add_only: false,
        }
    }

    pub fn with_include(mut self, include: BTreeSet<Uuid>) -> Self {
        self.include = Some(include);
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }
}

impl From<&ReindexTask> for ReindexRequest {
    fn from(task: &ReindexTask) -> Self {
        Self {
            tx_ids: task.tx_ids.clone(),
            flags: task.flags,
            include: task.include.clone(),
            exclude: task.exclude.clone(),
            completed: task.completed,
            add_only: task.add_only,
        }
    }
}

/// What the engine did with a request.
#[derive(Debug, Default)]
pub struct ReindexOutcome {
    /// Follow-up work the engine wants queued instead of done inline.
    pub deferred: Option<ReindexTask>,
}

/// The index backend seam.
#[async_trait]
pub trait IndexEngine: Send + Sync {
    /// Brings the index up to date for the requested transactions.
    async fn reindex(&self, tenant: &TenantId, request: &ReindexRequest)
    -> Result<ReindexOutcome>;

    /// Reindexes an entity and everything beneath it.
    async fn reindex_subtree(&self, tenant: &TenantId, root: Uuid) -> Result<()>;

    /// Removes every index entry tagged with the transaction uuid.
    async fn remove_transaction(&self, tenant: &TenantId, tx: TxnUuid) -> Result<()>;
}

#[derive(Default)]
struct EngineState {
    reindexes: Vec<(TenantId, ReindexRequest)>,
    subtrees: Vec<(TenantId, Uuid)>,
    removals: Vec<(TenantId, TxnUuid)>,
    fail_reindex: usize,
    defer_next: Option<ReindexTask>,
}

/// Recording engine for tests.
#[derive(Clone, Default)]
pub struct InMemoryIndexEngine {
    state: Arc<Mutex<EngineState>>,
}

impl InMemoryIndexEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` reindex calls fail.
    pub fn set_fail_reindex(&self, n: usize) {
        self.state.lock().unwrap().fail_reindex = n;
    }

    /// Makes the next reindex call hand back the given follow-up task.
    pub fn set_defer_next(&self, task: ReindexTask) {
        self.state.lock().unwrap().defer_next = Some(task);
    }

    /// Every reindex request seen, in call order.
    pub fn reindex_calls(&self) -> Vec<(TenantId, ReindexRequest)> {
        self.state.lock().unwrap().reindexes.clone()
    }

    /// Every subtree reindex seen, in call order.
    pub fn subtree_calls(&self) -> Vec<(TenantId, Uuid)> {
        self.state.lock().unwrap().subtrees.clone()
    }

    /// Every transaction removal seen, in call order.
    pub fn removals(&self) -> Vec<(TenantId, TxnUuid)> {
        self.state.lock().unwrap().removals.clone()
    }
}

#[async_trait]
impl IndexEngine for InMemoryIndexEngine {
    async fn reindex(
        &self,
        tenant: &TenantId,
        request: &ReindexRequest,
    ) -> Result<ReindexOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reindex > 0 {
            state.fail_reindex -= 1;
            return Err(IndexingError::Engine("injected reindex failure".to_string()));
        }
        state.reindexes.push((tenant.clone(), request.clone()));
        Ok(ReindexOutcome {
            deferred: state.defer_next.take(),
        })
    }

    async fn reindex_subtree(&self, tenant: &TenantId, root: Uuid) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .subtrees
            .push((tenant.clone(), root));
        Ok(())
    }

    async fn remove_transaction(&self, tenant: &TenantId, tx: TxnUuid) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .removals
            .push((tenant.clone(), tx));
        Ok(())
    }
}
