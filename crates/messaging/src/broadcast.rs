//! Request/reply broadcast over a topic.
//!
//! Used for cluster-wide health probes: the request fans out to every
//! subscriber, each replies to a private queue, and the caller collects
//! whatever arrives within a bounded wait.

use std::time::Duration;

use common::Message;
use uuid::Uuid;

use crate::broker::{Broker, Destination};
use crate::error::BrokerError;

/// Fans a request out on a topic and collects correlated replies.
///
/// The wait bounds the whole collection, so the result holds the replies of
/// however many subscribers answered in time. No subscribers is not an
/// error; the result is simply empty.
#[tracing::instrument(skip(broker, request))]
pub async fn broadcast_request<B: Broker + ?Sized>(
    broker: &B,
    topic: &str,
    request: Message,
    wait: Duration,
) -> Result<Vec<Message>, BrokerError> {
    let correlation_id = Uuid::new_v4();
    let reply_queue = format!("reply.{correlation_id}");

    let mut conn = broker.connect().await?;
    conn.subscribe(&Destination::Queue(reply_queue.clone()), 0)
        .await?;
    conn.send(
        &Destination::Topic(topic.to_string()),
        request
            .with_correlation_id(correlation_id)
            .with_reply_to(&reply_queue),
    )
    .await?;

    let mut replies = Vec::new();
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let delivery = match tokio::time::timeout_at(deadline, conn.receive()).await {
            Ok(Ok(delivery)) => delivery,
            Ok(Err(e)) => {
                conn.close().await;
                return Err(e);
            }
            Err(_) => break,
        };
        conn.ack(&delivery).await?;
        // Stray replies from an earlier probe are dropped.
        if delivery.message.correlation_id == Some(correlation_id) {
            replies.push(delivery.message);
        }
    }
    conn.close().await;

    tracing::debug!(topic, replies = replies.len(), "broadcast complete");
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use common::message_types;
    use std::sync::Arc;

    #[tokio::test]
    async fn no_subscribers_yields_empty() {
        let broker = InMemoryBroker::new();
        let replies = broadcast_request(
            &broker,
            "health",
            Message::new(message_types::EVENT),
            Duration::from_millis(20),
        )
        .await
        .unwrap();
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn collects_replies_from_each_subscriber() {
        let broker = Arc::new(InMemoryBroker::new());

        // Two responders that echo to the reply queue.
        let mut responders = Vec::new();
        for name in ["a", "b"] {
            let broker = Arc::clone(&broker);
            responders.push(tokio::spawn(async move {
                let mut conn = broker.connect().await.unwrap();
                conn.subscribe(&Destination::Topic("health".to_string()), 0)
                    .await
                    .unwrap();
                let delivery = conn.receive().await.unwrap();
                conn.ack(&delivery).await.unwrap();
                let reply_to = delivery.message.reply_to.clone().unwrap();
                let reply = Message::new(message_types::EVENT)
                    .with_property("node", name)
                    .with_correlation_id(delivery.message.correlation_id.unwrap());
                conn.send(&Destination::Queue(reply_to), reply)
                    .await
                    .unwrap();
            }));
        }
        // Let the responders subscribe before the fan-out.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let replies = broadcast_request(
            &*broker,
            "health",
            Message::new(message_types::EVENT),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        for responder in responders {
            responder.await.unwrap();
        }
        let mut nodes: Vec<_> = replies
            .iter()
            .filter_map(|m| m.property("node"))
            .collect();
        nodes.sort_unstable();
        assert_eq!(nodes, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn uncorrelated_replies_are_dropped() {
        let broker = Arc::new(InMemoryBroker::new());

        let responder = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                let mut conn = broker.connect().await.unwrap();
                conn.subscribe(&Destination::Topic("health".to_string()), 0)
                    .await
                    .unwrap();
                let delivery = conn.receive().await.unwrap();
                conn.ack(&delivery).await.unwrap();
                let reply_to = delivery.message.reply_to.clone().unwrap();
                // Wrong correlation id: must not count as a reply.
                let reply = Message::new(message_types::EVENT)
                    .with_correlation_id(Uuid::new_v4());
                conn.send(&Destination::Queue(reply_to), reply)
                    .await
                    .unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let replies = broadcast_request(
            &*broker,
            "health",
            Message::new(message_types::EVENT),
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        responder.await.unwrap();
        assert!(replies.is_empty());
    }
}
