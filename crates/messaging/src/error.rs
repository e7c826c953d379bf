use thiserror::Error;

/// Errors raised by broker connections.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection to the broker was lost.
    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    /// The destination name is empty or malformed.
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// The connection has no active subscription to receive from.
    #[error("No subscription on this connection")]
    NotSubscribed,

    /// The broker or connection has been shut down.
    #[error("Broker connection closed")]
    Closed,
}

/// Errors surfaced to producers.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The producer is shutting down; the request was abandoned.
    #[error("Producer is shutting down")]
    ShuttingDown,

    /// A broker-level failure that survived the producer's retries.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Errors raised by message handlers, classified for the consumer loop.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Malformed or unroutable message: acknowledged and dropped.
    #[error("Bad message: {0}")]
    BadMessage(String),

    /// Client-level failure (4xx-equivalent): acknowledged and dropped.
    #[error("Client error: {0}")]
    Client(String),

    /// Server-level failure (5xx-equivalent): left unacknowledged so the
    /// broker redelivers.
    #[error("Server error: {0}")]
    Server(String),
}
