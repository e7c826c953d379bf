use async_trait::async_trait;
use common::{DeliveryId, Message};

use crate::error::BrokerError;

/// Prefix selecting topic fan-out over point-to-point delivery.
const TOPIC_PREFIX: &str = "topic:";

/// A named broker destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Point-to-point queue: one consumer receives each message.
    Queue(String),
    /// Topic: every subscriber receives each message.
    Topic(String),
}

impl Destination {
    /// Returns the bare destination name.
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name) | Destination::Topic(name) => name,
        }
    }
}

impl std::str::FromStr for Destination {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (topic, name) = match s.strip_prefix(TOPIC_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if name.is_empty() {
            return Err(BrokerError::InvalidDestination(s.to_string()));
        }
        Ok(if topic {
            Destination::Topic(name.to_string())
        } else {
            Destination::Queue(name.to_string())
        })
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "{name}"),
            Destination::Topic(name) => write!(f, "{TOPIC_PREFIX}{name}"),
        }
    }
}

/// One message as received by a consumer, with its acknowledgement tag.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The received message.
    pub message: Message,
    /// Connection-local acknowledgement tag.
    pub tag: u64,
}

/// Broker client seam.
///
/// Connections are not safe for concurrent use (a constraint shared by most
/// broker wire protocols), so every worker opens its own.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Opens a new dedicated connection.
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError>;
}

/// One dedicated broker connection. Not shareable across workers.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Sends a message, resolving once the broker has accepted it.
    async fn send(
        &mut self,
        destination: &Destination,
        message: Message,
    ) -> Result<DeliveryId, BrokerError>;

    /// Attaches this connection as a consumer of the destination.
    ///
    /// `consumer_priority` is a broker hint: when a broker multiplexes
    /// consumers, higher-priority ones preferentially receive messages.
    async fn subscribe(
        &mut self,
        destination: &Destination,
        consumer_priority: i32,
    ) -> Result<(), BrokerError>;

    /// Waits for the next delivery on the subscribed destination.
    ///
    /// A previously received but unacknowledged delivery is returned to the
    /// queue first (broker-native redelivery).
    async fn receive(&mut self) -> Result<Delivery, BrokerError>;

    /// Acknowledges a delivery, removing it permanently.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Closes the connection, returning unacknowledged deliveries.
    async fn close(&mut self);
}
