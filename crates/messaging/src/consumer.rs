//! Consumer worker pool.
//!
//! Each configured channel gets `concurrency` workers, and every worker owns
//! a dedicated broker connection. Workers receive, dispatch and acknowledge
//! one message at a time; a handler failure affects only that delivery. Lost
//! connections are re-established after a retry interval until shutdown.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_ops::AsyncOperationStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::{Broker, BrokerConnection, Destination};
use crate::config::{ChannelConfig, ConsumerConfig};
use crate::dispatcher::{Dispatcher, Disposition};
use crate::error::BrokerError;

/// Pool of consumer workers feeding a shared dispatcher.
pub struct ConsumerPool {
    shutdown: watch::Sender<bool>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl ConsumerPool {
    /// Starts one worker per channel slot.
    pub fn start<B, S>(
        broker: Arc<B>,
        dispatcher: Arc<Dispatcher<S>>,
        config: ConsumerConfig,
    ) -> Self
    where
        B: Broker + 'static,
        S: AsyncOperationStore + 'static,
    {
        let (shutdown, _) = watch::channel(false);
        let mut workers = Vec::with_capacity(config.total_concurrency());
        for channel in &config.channels {
            for slot in 0..channel.concurrency.max(1) {
                let broker = Arc::clone(&broker);
                let dispatcher = Arc::clone(&dispatcher);
                let channel = channel.clone();
                let shutdown_rx = shutdown.subscribe();
                let retry = config.retry_interval;
                workers.push(tokio::spawn(worker_loop(
                    slot, broker, dispatcher, channel, shutdown_rx, retry,
                )));
            }
        }
        Self {
            shutdown,
            workers: StdMutex::new(workers),
        }
    }

    /// Signals all workers to stop and waits for them to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            let _ = handle.await;
        }
    }
}

async fn worker_loop<B, S>(
    slot: usize,
    broker: Arc<B>,
    dispatcher: Arc<Dispatcher<S>>,
    channel: ChannelConfig,
    mut shutdown: watch::Receiver<bool>,
    retry: Duration,
) where
    B: Broker,
    S: AsyncOperationStore,
{
    let destination: Destination = match channel.destination.parse() {
        Ok(destination) => destination,
        Err(e) => {
            tracing::error!(channel = %channel.destination, error = %e, "unusable channel");
            return;
        }
    };

    'connect: while !*shutdown.borrow() {
        let mut conn = match attach(&*broker, &destination, channel.consumer_priority).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(slot, channel = %destination, error = %e, "consumer connect failed");
                metrics::counter!("consumer_reconnects").increment(1);
                if wait_or_shutdown(&mut shutdown, retry).await {
                    break 'connect;
                }
                continue 'connect;
            }
        };
        tracing::debug!(slot, channel = %destination, "consumer attached");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.changed() => {
                    conn.close().await;
                    break 'connect;
                }
                delivery = conn.receive() => match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        tracing::warn!(slot, channel = %destination, error = %e, "receive failed");
                        metrics::counter!("consumer_reconnects").increment(1);
                        conn.close().await;
                        if wait_or_shutdown(&mut shutdown, retry).await {
                            break 'connect;
                        }
                        continue 'connect;
                    }
                },
            };

            match dispatcher.dispatch(&delivery.message).await {
                Disposition::Ack => {
                    if let Err(e) = conn.ack(&delivery).await {
                        tracing::warn!(slot, channel = %destination, error = %e, "ack failed");
                        conn.close().await;
                        if wait_or_shutdown(&mut shutdown, retry).await {
                            break 'connect;
                        }
                        continue 'connect;
                    }
                }
                Disposition::Retry => {
                    // Leave the delivery unacknowledged; pause so the broker
                    // redelivery does not spin.
                    if wait_or_shutdown(&mut shutdown, retry).await {
                        conn.close().await;
                        break 'connect;
                    }
                }
            }
        }
    }

    tracing::debug!(slot, channel = %channel.destination, "consumer worker exited");
}

async fn attach<B: Broker + ?Sized>(
    broker: &B,
    destination: &Destination,
    consumer_priority: i32,
) -> Result<Box<dyn BrokerConnection>, BrokerError> {
    let mut conn = broker.connect().await?;
    conn.subscribe(destination, consumer_priority).await?;
    Ok(conn)
}

/// Sleeps for the retry interval, returning true if shutdown came first.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, retry: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(retry) => *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::MessageHandler;
    use crate::error::HandlerError;
    use crate::memory::InMemoryBroker;
    use async_ops::{AsyncOperationService, InMemoryAsyncOperationStore};
    use async_trait::async_trait;
    use common::{Identity, Message, StaticIdentityProvider, message_types, properties};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicU32>,
        fail_first: Arc<AtomicU32>,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(
            &self,
            _message: &Message,
            _identity: Option<&Identity>,
        ) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(HandlerError::Server("transient".to_string()));
            }
            Ok(())
        }
    }

    fn pool_config(retry_ms: u64) -> ConsumerConfig {
        ConsumerConfig {
            channels: vec![ChannelConfig::new("index.default", 0, 2)],
            retry_interval: Duration::from_millis(retry_ms),
        }
    }

    fn dispatcher_with(
        calls: &Arc<AtomicU32>,
        fail_first: u32,
    ) -> Arc<Dispatcher<InMemoryAsyncOperationStore>> {
        let mut dispatcher = Dispatcher::new(
            Arc::new(StaticIdentityProvider::new()),
            AsyncOperationService::new(InMemoryAsyncOperationStore::new()),
        );
        dispatcher.register(
            message_types::REINDEX,
            Box::new(CountingHandler {
                calls: Arc::clone(calls),
                fail_first: Arc::new(AtomicU32::new(fail_first)),
            }),
        );
        Arc::new(dispatcher)
    }

    async fn wait_until(calls: &Arc<AtomicU32>, at_least: u32) {
        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "handler called {} times, expected at least {at_least}",
            calls.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn drains_queue_and_acks() {
        let broker = Arc::new(InMemoryBroker::new());
        let calls = Arc::new(AtomicU32::new(0));
        let pool = ConsumerPool::start(
            Arc::clone(&broker),
            dispatcher_with(&calls, 0),
            pool_config(20),
        );

        let mut producer = broker.connect().await.unwrap();
        let destination = Destination::Queue("index.default".to_string());
        for _ in 0..3 {
            producer
                .send(
                    &destination,
                    Message::new(message_types::REINDEX)
                        .with_property(properties::TENANT, "acme"),
                )
                .await
                .unwrap();
        }

        wait_until(&calls, 3).await;
        pool.shutdown().await;
        assert_eq!(broker.queue_depth("index.default"), 0);
    }

    #[tokio::test]
    async fn server_error_leads_to_redelivery() {
        let broker = Arc::new(InMemoryBroker::new());
        let calls = Arc::new(AtomicU32::new(0));
        // First attempt fails with a server error; the delivery stays
        // unacknowledged and must come around again.
        let pool = ConsumerPool::start(
            Arc::clone(&broker),
            dispatcher_with(&calls, 1),
            pool_config(10),
        );

        let mut producer = broker.connect().await.unwrap();
        producer
            .send(
                &Destination::Queue("index.default".to_string()),
                Message::new(message_types::REINDEX).with_property(properties::TENANT, "acme"),
            )
            .await
            .unwrap();

        wait_until(&calls, 2).await;
        pool.shutdown().await;
        assert_eq!(broker.queue_depth("index.default"), 0);
    }

    #[tokio::test]
    async fn registers_consumer_priority() {
        let broker = Arc::new(InMemoryBroker::new());
        let calls = Arc::new(AtomicU32::new(0));
        let config = ConsumerConfig {
            channels: vec![ChannelConfig::new("index.high", 4, 1).with_threshold(5)],
            retry_interval: Duration::from_millis(20),
        };
        let pool = ConsumerPool::start(Arc::clone(&broker), dispatcher_with(&calls, 0), config);

        for _ in 0..100 {
            if !broker.subscriber_priorities("index.high").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(broker.subscriber_priorities("index.high"), vec![4]);
        pool.shutdown().await;
    }
}
