//! Content store seam and in-memory implementation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{ContentUrl, TenantId};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Result, StoreError};

/// Raw content storage.
///
/// The core uses this seam only for rollback cleanup and volume accounting;
/// concurrent writers to the same address are not protected at this layer.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Writes a stream to the given address, returning the size written.
    async fn write_stream(
        &self,
        url: &ContentUrl,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    /// Deletes the object at the given address.
    async fn delete(&self, url: &ContentUrl) -> Result<()>;

    /// Resolves an address to a local filesystem path, if the backend has one.
    async fn get_path(&self, url: &ContentUrl) -> Result<PathBuf>;

    /// Returns the total number of bytes stored for a tenant.
    ///
    /// Addresses are expected to carry the tenant as their first path
    /// segment (`tenant/...`).
    async fn tenant_volume(&self, tenant: &TenantId) -> Result<u64>;
}

#[derive(Debug, Default)]
struct ContentState {
    objects: HashMap<ContentUrl, Vec<u8>>,
    delete_counts: HashMap<ContentUrl, u32>,
    fail_on_delete: bool,
}

/// In-memory content store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContentStore {
    state: Arc<RwLock<ContentState>>,
}

impl InMemoryContentStore {
    /// Creates a new empty content store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    pub fn object_count(&self) -> usize {
        self.state.read().unwrap().objects.len()
    }

    /// Returns how many delete attempts the address has received.
    pub fn delete_attempts(&self, url: &ContentUrl) -> u32 {
        self.state
            .read()
            .unwrap()
            .delete_counts
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Configures the store to fail delete calls.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.state.write().unwrap().fail_on_delete = fail;
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn write_stream(
        &self,
        url: &ContentUrl,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        let size = data.len() as u64;
        self.state.write().unwrap().objects.insert(url.clone(), data);
        Ok(size)
    }

    async fn delete(&self, url: &ContentUrl) -> Result<()> {
        let mut state = self.state.write().unwrap();
        *state.delete_counts.entry(url.clone()).or_insert(0) += 1;
        if state.fail_on_delete {
            return Err(StoreError::Backend("delete refused".to_string()));
        }
        state
            .objects
            .remove(url)
            .map(|_| ())
            .ok_or_else(|| StoreError::ContentNotFound(url.to_string()))
    }

    async fn get_path(&self, url: &ContentUrl) -> Result<PathBuf> {
        let state = self.state.read().unwrap();
        if state.objects.contains_key(url) {
            Ok(PathBuf::from(format!("/mem/{url}")))
        } else {
            Err(StoreError::ContentNotFound(url.to_string()))
        }
    }

    async fn tenant_volume(&self, tenant: &TenantId) -> Result<u64> {
        let prefix = format!("{tenant}/");
        let state = self.state.read().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|(url, _)| url.as_str().starts_with(&prefix))
            .map(|(_, data)| data.len() as u64)
            .sum())
    }
}
