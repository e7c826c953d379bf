//! Reliable producer pool.
//!
//! Callers hand `(destination, message)` pairs into a bounded in-process
//! queue and await a future resolving to the broker delivery id. A fixed set
//! of workers drains the queue, each over its own dedicated connection. A
//! worker that hits a broker failure keeps the item, tears its connection
//! down and reconnects after a backoff, so accepted items are delivered
//! at least once unless the pool shuts down.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use async_ops::{MessageSender, SendError};
use common::{DeliveryId, Message};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::broker::{Broker, BrokerConnection, Destination};
use crate::config::ProducerConfig;
use crate::error::ProducerError;

struct ProduceRequest {
    destination: Destination,
    message: Message,
    reply: oneshot::Sender<Result<DeliveryId, ProducerError>>,
}

/// Durable hand-off of outbound messages to the broker.
pub struct ReliableProducer {
    tx: mpsc::Sender<ProduceRequest>,
    shutdown: watch::Sender<bool>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl ReliableProducer {
    /// Starts the worker pool against the given broker.
    pub fn start<B: Broker + 'static>(broker: Arc<B>, config: ProducerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown, _) = watch::channel(false);

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let broker = Arc::clone(&broker);
                let rx = Arc::clone(&rx);
                let shutdown_rx = shutdown.subscribe();
                let backoff = config.reconnect_backoff;
                tokio::spawn(worker_loop(worker, broker, rx, shutdown_rx, backoff))
            })
            .collect();

        Self {
            tx,
            shutdown,
            workers: StdMutex::new(workers),
        }
    }

    /// Submits a message for delivery.
    ///
    /// Blocks while the hand-off queue is full and resolves once a worker
    /// has pushed the message to the broker.
    pub async fn send(
        &self,
        destination: &str,
        message: Message,
    ) -> Result<DeliveryId, ProducerError> {
        if *self.shutdown.borrow() {
            return Err(ProducerError::ShuttingDown);
        }
        let destination: Destination = destination.parse()?;
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(ProduceRequest {
                destination,
                message,
                reply,
            })
            .await
            .map_err(|_| ProducerError::ShuttingDown)?;
        reply_rx.await.map_err(|_| ProducerError::ShuttingDown)?
    }

    /// Signals the workers to stop and waits for them to exit.
    ///
    /// Requests still queued or in flight are abandoned, not retried.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl MessageSender for ReliableProducer {
    async fn send(&self, destination: &str, message: Message) -> Result<DeliveryId, SendError> {
        ReliableProducer::send(self, destination, message)
            .await
            .map_err(|e| SendError(e.to_string()))
    }
}

async fn worker_loop<B: Broker>(
    worker: usize,
    broker: Arc<B>,
    rx: Arc<Mutex<mpsc::Receiver<ProduceRequest>>>,
    mut shutdown: watch::Receiver<bool>,
    backoff: Duration,
) {
    let mut pending: Option<ProduceRequest> = None;

    'connect: while !*shutdown.borrow() {
        let mut conn: Box<dyn BrokerConnection> = match broker.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(worker, error = %e, "producer connect failed");
                metrics::counter!("producer_reconnects").increment(1);
                if wait_or_shutdown(&mut shutdown, backoff).await {
                    break 'connect;
                }
                continue 'connect;
            }
        };
        tracing::debug!(worker, "producer connected");

        loop {
            let request = match pending.take() {
                Some(request) => request,
                None => {
                    let next = async { rx.lock().await.recv().await };
                    tokio::select! {
                        _ = shutdown.changed() => break 'connect,
                        request = next => match request {
                            Some(request) => request,
                            None => break 'connect,
                        },
                    }
                }
            };

            match conn.send(&request.destination, request.message.clone()).await {
                Ok(id) => {
                    metrics::counter!("producer_sent").increment(1);
                    let _ = request.reply.send(Ok(id));
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        // Interrupted during shutdown: abandon, do not retry.
                        let _ = request.reply.send(Err(ProducerError::ShuttingDown));
                        break 'connect;
                    }
                    tracing::warn!(
                        worker,
                        destination = %request.destination,
                        error = %e,
                        "send failed, requeueing and reconnecting"
                    );
                    metrics::counter!("producer_retries").increment(1);
                    pending = Some(request);
                    conn.close().await;
                    if wait_or_shutdown(&mut shutdown, backoff).await {
                        break 'connect;
                    }
                    continue 'connect;
                }
            }
        }
    }

    // Anything still pending at shutdown is abandoned; dropping the reply
    // channel surfaces ShuttingDown to the caller.
    tracing::debug!(worker, "producer worker exited");
}

/// Sleeps for the backoff, returning true if shutdown was signaled first.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, backoff: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(backoff) => *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;

    fn config() -> ProducerConfig {
        ProducerConfig {
            workers: 2,
            queue_capacity: 16,
            reconnect_backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn delivers_to_queue() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = ReliableProducer::start(Arc::clone(&broker), config());

        let id = producer
            .send("index.default", Message::new("reindex"))
            .await
            .unwrap();
        assert_ne!(id.as_uuid(), uuid::Uuid::nil());
        assert_eq!(broker.queue_depth("index.default"), 1);

        producer.shutdown().await;
    }

    #[tokio::test]
    async fn retries_after_broker_failure() {
        let broker = Arc::new(InMemoryBroker::new());
        // First send attempt fails; the worker must reconnect and retry the
        // same item rather than dropping it.
        broker.set_fail_sends(1);
        let producer = ReliableProducer::start(Arc::clone(&broker), config());

        let id = producer
            .send("index.default", Message::new("reindex"))
            .await;
        assert!(id.is_ok());
        assert_eq!(broker.queue_depth("index.default"), 1);

        producer.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_destination_rejected_up_front() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = ReliableProducer::start(broker, config());

        let result = producer.send("", Message::new("reindex")).await;
        assert!(matches!(result, Err(ProducerError::Broker(_))));

        producer.shutdown().await;
    }

    #[tokio::test]
    async fn send_after_shutdown_fails() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = ReliableProducer::start(broker, config());
        producer.shutdown().await;

        let result = producer.send("index.default", Message::new("reindex")).await;
        assert!(matches!(result, Err(ProducerError::ShuttingDown)));
    }

    #[tokio::test]
    async fn topic_destination_parses_and_sends() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = ReliableProducer::start(Arc::clone(&broker), config());

        producer
            .send("topic:events", Message::new("event"))
            .await
            .unwrap();
        assert_eq!(broker.sent_total(), 1);

        producer.shutdown().await;
    }
}
