use chrono::{DateTime, Utc};
use common::{TenantId, TxnId, TxnUuid};
use serde::{Deserialize, Serialize};

/// One committed logical change set.
///
/// Created when a logical transaction begins and immutable afterwards;
/// only `indexed_at` is recorded later, once the search index has caught up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationTransaction {
    /// Numeric identifier, assigned by the store.
    pub id: TxnId,
    /// Tenant the change set belongs to.
    pub tenant: TenantId,
    /// External uuid tagging the transaction's index entries.
    pub uuid: TxnUuid,
    /// When the transaction record was created.
    pub created_at: DateTime<Utc>,
    /// When the search index last caught up with this transaction, if ever.
    pub indexed_at: Option<DateTime<Utc>>,
    /// Storage-schema version in effect when the transaction was written.
    pub schema_version: i64,
}

impl ApplicationTransaction {
    /// Returns true once the search index has caught up.
    pub fn is_indexed(&self) -> bool {
        self.indexed_at.is_some()
    }
}
