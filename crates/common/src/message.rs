//! Broker-neutral message envelope.
//!
//! A message is a type tag plus a flat string property map, matching what
//! every broker client can carry natively. Anything richer (id sets, flag
//! masks) is encoded into properties by the owning module.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fixed message-type tags routed by the dispatcher.
pub mod message_types {
    /// Bring the index up to date for a set of transactions.
    pub const REINDEX: &str = "reindex";
    /// Reindex a contiguous transaction-id range in blocks.
    pub const REINDEX_RANGE: &str = "reindex-range";
    /// Create a link between two entities.
    pub const LINK: &str = "link";
    /// Batch operation across a set of entities.
    pub const MULTI_NODE: &str = "multi-node";
    /// Distributed repository event.
    pub const EVENT: &str = "event";
    /// Round-trip probe for tracked async operations.
    pub const TRACE: &str = "trace";
    /// Reconcile the search index against the store.
    pub const SOLR_SYNC: &str = "solr-sync";
    /// Purge old transaction records.
    pub const TX_CLEAN: &str = "tx-clean";
    /// Remove orphaned entity records.
    pub const NODES_CLEAN: &str = "nodes-clean";
    /// Recompute per-tenant content volumes.
    pub const CALC_VOLUMES: &str = "calc-volumes";
}

/// Well-known property keys.
pub mod properties {
    /// Tenant name the message applies to.
    pub const TENANT: &str = "tenant";
    /// Explicit authority reference for identity resolution.
    pub const AUTHORITY: &str = "authority";
    /// Tracked async-operation id.
    pub const TASK_ID: &str = "taskId";
    /// Comma-joined transaction id list.
    pub const TX: &str = "tx";
    /// Reindex flag mask as a 4-character binary string.
    pub const FLAGS: &str = "flags";
    /// Whether the transactions are fully written when indexed.
    pub const COMPLETED: &str = "completed";
    /// Whether the reindex may skip deletions.
    pub const ADD_ONLY: &str = "addOnly";
    /// Comma-joined uuid set restricting the reindex.
    pub const INCLUDE: &str = "include";
    /// Comma-joined uuid set excluded from the reindex.
    pub const EXCLUDE: &str = "exclude";
}

/// Broker-assigned identifier of a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(Uuid);

impl DeliveryId {
    /// Creates a fresh delivery id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message travelling through the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Type tag used for dispatch routing.
    pub message_type: String,
    /// Flat string attribute map.
    pub properties: HashMap<String, String>,
    /// Broker-native priority, if any.
    pub priority: Option<u8>,
    /// Correlation id for request/response exchanges.
    pub correlation_id: Option<Uuid>,
    /// Destination for replies in request/response exchanges.
    pub reply_to: Option<String>,
}

impl Message {
    /// Creates a message with the given type tag and no properties.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            properties: HashMap::new(),
            priority: None,
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Adds a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the broker-native priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Sets the reply destination.
    pub fn with_reply_to(mut self, destination: impl Into<String>) -> Self {
        self.reply_to = Some(destination.into());
        self
    }

    /// Returns a property value.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}
