//! Reliable message dispatch layer.
//!
//! Three cooperating pieces: a producer pool that hands messages to the
//! broker durably, a consumer pool that receives with per-message error
//! isolation, and a dispatcher that routes inbound messages by type tag.
//! The broker itself sits behind a narrow seam; an in-memory twin backs the
//! tests.

pub mod broadcast;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod producer;

pub use broadcast::broadcast_request;
pub use broker::{Broker, BrokerConnection, Delivery, Destination};
pub use config::{ChannelConfig, ConsumerConfig, ProducerConfig};
pub use consumer::ConsumerPool;
pub use dispatcher::{Dispatcher, Disposition, MessageHandler};
pub use error::{BrokerError, HandlerError, ProducerError};
pub use memory::InMemoryBroker;
pub use producer::ReliableProducer;
