//! Shared types for the repository indexing-consistency core.
//!
//! Everything here is consumed by more than one crate: identifier newtypes,
//! the effective-identity model, and the broker-neutral message envelope.

pub mod identity;
pub mod ids;
pub mod message;

pub use identity::{Identity, IdentityError, IdentityProvider, StaticIdentityProvider};
pub use ids::{ContentUrl, TaskId, TenantId, TxnId, TxnUuid};
pub use message::{DeliveryId, Message, message_types, properties};
