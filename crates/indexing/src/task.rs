//! Queued reindex work and its wire mapping.

use std::collections::BTreeSet;

use common::{Message, TenantId, TxnId, message_types, properties};
use uuid::Uuid;

use crate::error::{IndexingError, Result};
use crate::flags::ReindexFlags;

/// One unit of queued reindex work.
///
/// Built once and never mutated after enqueue; workers see exactly what the
/// submitter decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexTask {
    pub tenant: TenantId,
    pub tx_ids: Vec<TxnId>,
    pub flags: ReindexFlags,
    /// Restrict the reindex to these entities.
    pub include: Option<BTreeSet<Uuid>>,
    /// Skip these entities.
    pub exclude: Option<BTreeSet<Uuid>>,
    /// Whether the listed transactions are fully written.
    pub completed: bool,
    /// Whether the reindex may skip deletions.
    pub add_only: bool,
    pub priority: u8,
}

impl ReindexTask {
    /// Creates a task with default flags and no restrictions.
    pub fn new(tenant: TenantId, tx_ids: Vec<TxnId>) -> Self {
        Self {
            tenant,
            tx_ids,
            flags: ReindexFlags::default(),
            include: None,
            exclude: None,
            completed: true,
            add_only: false,
            priority: 0,
        }
    }

    pub fn with_flags(mut self, flags: ReindexFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_include(mut self, include: BTreeSet<Uuid>) -> Self {
        self.include = Some(include);
        self
    }

    pub fn with_exclude(mut self, exclude: BTreeSet<Uuid>) -> Self {
        self.exclude = Some(exclude);
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    pub fn with_add_only(mut self, add_only: bool) -> Self {
        self.add_only = add_only;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Encodes the task as a broker message.
    pub fn to_message(&self) -> Message {
        let mut message = Message::new(message_types::REINDEX)
            .with_property(properties::TENANT, self.tenant.as_str())
            .with_property(properties::TX, join_ids(&self.tx_ids))
            .with_property(properties::FLAGS, self.flags.to_wire())
            .with_property(properties::COMPLETED, bool_str(self.completed))
            .with_property(properties::ADD_ONLY, bool_str(self.add_only))
            .with_priority(self.priority);
        if let Some(include) = &self.include {
            message = message.with_property(properties::INCLUDE, join_uuids(include));
        }
        if let Some(exclude) = &self.exclude {
            message = message.with_property(properties::EXCLUDE, join_uuids(exclude));
        }
        message
    }

    /// Decodes a task from a broker message.
    pub fn from_message(message: &Message) -> Result<Self> {
        let tenant = message
            .property(properties::TENANT)
            .ok_or_else(|| IndexingError::bad_attribute(properties::TENANT, "<missing>"))?;
        let tx = message
            .property(properties::TX)
            .ok_or_else(|| IndexingError::bad_attribute(properties::TX, "<missing>"))?;
        let flags = match message.property(properties::FLAGS) {
            Some(wire) => ReindexFlags::from_wire(wire)?,
            None => ReindexFlags::default(),
        };

        Ok(Self {
            tenant: TenantId::new(tenant),
            tx_ids: parse_ids(tx)?,
            flags,
            include: parse_uuid_set(message.property(properties::INCLUDE))?,
            exclude: parse_uuid_set(message.property(properties::EXCLUDE))?,
            completed: parse_bool(message.property(properties::COMPLETED), true)?,
            add_only: parse_bool(message.property(properties::ADD_ONLY), false)?,
            priority: message.priority.unwrap_or(0),
        })
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn join_ids(ids: &[TxnId]) -> String {
    ids.iter()
        .map(|id| id.as_i64().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn join_uuids(uuids: &BTreeSet<Uuid>) -> String {
    uuids
        .iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_ids(value: &str) -> Result<Vec<TxnId>> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map(TxnId::new)
                .map_err(|_| IndexingError::bad_attribute(properties::TX, value))
        })
        .collect()
}

fn parse_uuid_set(value: Option<&str>) -> Result<Option<BTreeSet<Uuid>>> {
    let Some(value) = value else {
        return Ok(None);
    };
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Uuid>()
                .map_err(|_| IndexingError::bad_attribute(properties::INCLUDE, value))
        })
        .collect::<Result<BTreeSet<_>>>()
        .map(Some)
}

fn parse_bool(value: Option<&str>, default: bool) -> Result<bool> {
    match value {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(IndexingError::bad_attribute(properties::COMPLETED, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_mapping_carries_all_attributes() {
        let include: BTreeSet<Uuid> = [Uuid::new_v4(), Uuid::new_v4()].into();
        let task = ReindexTask::new(TenantId::new("acme"), vec![TxnId::new(3), TxnId::new(7)])
            .with_flags(ReindexFlags::from_wire("1010").unwrap())
            .with_include(include.clone())
            .with_completed(false)
            .with_add_only(true)
            .with_priority(6);

        let message = task.to_message();
        assert_eq!(message.message_type, message_types::REINDEX);
        assert_eq!(message.property(properties::TX), Some("3,7"));
        assert_eq!(message.property(properties::FLAGS), Some("1010"));
        assert_eq!(message.priority, Some(6));

        let back = ReindexTask::from_message(&message).unwrap();
        assert_eq!(back, task);
        assert_eq!(back.include, Some(include));
    }

    #[test]
    fn missing_tenant_rejected() {
        let message = Message::new(message_types::REINDEX).with_property(properties::TX, "1");
        assert!(ReindexTask::from_message(&message).is_err());
    }

    #[test]
    fn defaults_applied_for_optional_attributes() {
        let message = Message::new(message_types::REINDEX)
            .with_property(properties::TENANT, "acme")
            .with_property(properties::TX, "42");
        let task = ReindexTask::from_message(&message).unwrap();
        assert_eq!(task.flags, ReindexFlags::all());
        assert!(task.completed);
        assert!(!task.add_only);
        assert_eq!(task.priority, 0);
        assert!(task.include.is_none());
    }

    #[test]
    fn malformed_tx_list_rejected() {
        let message = Message::new(message_types::REINDEX)
            .with_property(properties::TENANT, "acme")
            .with_property(properties::TX, "1,x,3");
        assert!(ReindexTask::from_message(&message).is_err());
    }
}
