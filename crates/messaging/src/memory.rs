use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{DeliveryId, Message};
use tokio::sync::Notify;

use crate::broker::{Broker, BrokerConnection, Delivery, Destination};
use crate::error::BrokerError;

#[derive(Default)]
struct QueueInner {
    messages: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl QueueInner {
    fn push_back(&self, message: Message) {
        self.messages.lock().unwrap().push_back(message);
        self.notify.notify_one();
    }

    fn push_front(&self, message: Message) {
        self.messages.lock().unwrap().push_front(message);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<Message> {
        self.messages.lock().unwrap().pop_front()
    }

    fn depth(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, Arc<QueueInner>>,
    topic_subscribers: HashMap<String, Vec<Arc<QueueInner>>>,
    subscriber_priorities: HashMap<String, Vec<i32>>,
    sent: u64,
}

/// In-memory broker for testing.
///
/// Models the delivery semantics the consumer loop relies on: competing
/// consumers on queues, fan-out on topics, and redelivery of deliveries that
/// were never acknowledged. Failure switches let tests exercise the
/// reconnect paths.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    fail_sends: Arc<AtomicUsize>,
    fail_connects: Arc<AtomicUsize>,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` sends fail with a connection error.
    pub fn set_fail_sends(&self, n: usize) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` connection attempts fail.
    pub fn set_fail_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Returns the number of messages waiting on a queue.
    pub fn queue_depth(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(name)
            .map(|q| q.depth())
            .unwrap_or(0)
    }

    /// Returns the total number of messages accepted by the broker.
    pub fn sent_total(&self) -> u64 {
        self.state.lock().unwrap().sent
    }

    /// Returns the consumer-priority hints registered on a destination.
    pub fn subscriber_priorities(&self, name: &str) -> Vec<i32> {
        self.state
            .lock()
            .unwrap()
            .subscriber_priorities
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        if take_one(&self.fail_connects) {
            return Err(BrokerError::ConnectionLost("connect refused".to_string()));
        }
        Ok(Box::new(InMemoryConnection {
            state: Arc::clone(&self.state),
            fail_sends: Arc::clone(&self.fail_sends),
            subscription: None,
            pending: None,
            next_tag: 0,
            closed: false,
        }))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct Subscription {
    queue: Arc<QueueInner>,
    /// Set for topic subscriptions so the private queue can be detached.
    topic: Option<String>,
}

struct InMemoryConnection {
    state: Arc<Mutex<BrokerState>>,
    fail_sends: Arc<AtomicUsize>,
    subscription: Option<Subscription>,
    pending: Option<(u64, Message)>,
    next_tag: u64,
    closed: bool,
}

impl InMemoryConnection {
    fn cleanup(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(sub) = self.subscription.take() {
            // Unacknowledged deliveries go back for redelivery.
            if let Some((_, message)) = self.pending.take() {
                sub.queue.push_front(message);
            }
            if let Some(topic) = sub.topic {
                let mut state = self.state.lock().unwrap();
                if let Some(subscribers) = state.topic_subscribers.get_mut(&topic) {
                    subscribers.retain(|q| !Arc::ptr_eq(q, &sub.queue));
                }
            }
        }
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn send(
        &mut self,
        destination: &Destination,
        message: Message,
    ) -> Result<DeliveryId, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if take_one(&self.fail_sends) {
            return Err(BrokerError::ConnectionLost("send refused".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        match destination {
            Destination::Queue(name) => {
                state
                    .queues
                    .entry(name.clone())
                    .or_default()
                    .push_back(message);
            }
            Destination::Topic(name) => {
                // No subscribers means the message fans out to nobody.
                if let Some(subscribers) = state.topic_subscribers.get(name) {
                    for queue in subscribers {
                        queue.push_back(message.clone());
                    }
                }
            }
        }
        state.sent += 1;
        Ok(DeliveryId::new())
    }

    async fn subscribe(
        &mut self,
        destination: &Destination,
        consumer_priority: i32,
    ) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let mut state = self.state.lock().unwrap();
        let subscription = match destination {
            Destination::Queue(name) => Subscription {
                queue: Arc::clone(state.queues.entry(name.clone()).or_default()),
                topic: None,
            },
            Destination::Topic(name) => {
                let queue = Arc::new(QueueInner::default());
                state
                    .topic_subscribers
                    .entry(name.clone())
                    .or_default()
                    .push(Arc::clone(&queue));
                Subscription {
                    queue,
                    topic: Some(name.clone()),
                }
            }
        };
        state
            .subscriber_priorities
            .entry(destination.name().to_string())
            .or_default()
            .push(consumer_priority);
        self.subscription = Some(subscription);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Delivery, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let queue = Arc::clone(
            &self
                .subscription
                .as_ref()
                .ok_or(BrokerError::NotSubscribed)?
                .queue,
        );

        // A delivery that was never acknowledged is redelivered first.
        if let Some((_, message)) = self.pending.take() {
            queue.push_front(message);
        }

        loop {
            let notified = queue.notify.notified();
            if let Some(message) = queue.try_pop() {
                self.next_tag += 1;
                self.pending = Some((self.next_tag, message.clone()));
                return Ok(Delivery {
                    message,
                    tag: self.next_tag,
                });
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if let Some((tag, _)) = self.pending
            && tag == delivery.tag
        {
            self.pending = None;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.cleanup();
    }
}
