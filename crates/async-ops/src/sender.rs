//! Outbound message seam used by [`AsyncOperationService::submit`].
//!
//! Defined here rather than in the messaging crate so this crate stays at
//! the bottom of the dependency chain; the reliable producer implements it.

use async_trait::async_trait;
use common::{DeliveryId, Message};
use thiserror::Error;

/// Failure to hand a message to the broker.
#[derive(Debug, Error)]
#[error("Message enqueue failed: {0}")]
pub struct SendError(pub String);

/// Durable hand-off of outbound messages.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends a message to a destination (`topic:` prefix selects fan-out).
    ///
    /// Resolves once the broker has accepted the message.
    async fn send(
        &self,
        destination: &str,
        message: Message,
    ) -> std::result::Result<DeliveryId, SendError>;
}
