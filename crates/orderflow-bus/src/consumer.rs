use std::sync::Arc;

use async_trait::async_trait;
use orderflow_core::OrderEvent;
use tracing::{error, info, warn};

use crate::broker::Delivery;
use crate::channel::Channel;
use crate::dedup::DedupCache;
use crate::error::{BrokerError, HandlerError};

/// Domain logic run for each new event on a queue.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: OrderEvent) -> Result<(), HandlerError>;
}

/// What happens to a delivery whose handler fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Requeue,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Duplicate,
    Acked,
    Requeued,
    Discarded,
}

pub struct Consumer {
    channel: Channel,
    queue: String,
    policy: FailurePolicy,
    dedup: DedupCache,
}

impl Consumer {
    pub fn new(channel: Channel, queue: &str, policy: FailurePolicy, dedup: DedupCache) -> Self {
        Self {
            channel,
            queue: queue.to_string(),
            policy,
            dedup,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Handles one delivery and settles it with the broker. Only a
    /// successfully handled message id is remembered, so a requeued message
    /// is processed again on redelivery.
    pub async fn process(
        &mut self,
        delivery: Delivery,
        handler: &dyn EventHandler,
    ) -> Result<Outcome, BrokerError> {
        let message_id = delivery
            .message_id
            .clone()
            .unwrap_or_else(|| String::from_utf8_lossy(&delivery.body).into_owned());

        if self.dedup.contains(&message_id) {
            warn!(queue = %self.queue, message_id = %message_id, "duplicate message skipped");
            self.channel.ack(delivery.tag).await?;
            return Ok(Outcome::Duplicate);
        }

        let event: OrderEvent = match serde_json::from_slice(&delivery.body) {
            Ok(event) => event,
            Err(err) => {
                error!(queue = %self.queue, message_id = %message_id, error = %err, "undecodable message discarded");
                self.channel.nack(delivery.tag, false).await?;
                return Ok(Outcome::Discarded);
            }
        };
        let event_type = event.event_type;

        match handler.handle(event).await {
            Ok(()) => {
                self.dedup.insert(&message_id);
                self.channel.ack(delivery.tag).await?;
                info!(
                    queue = %self.queue,
                    message_id = %message_id,
                    event_type = %event_type,
                    redelivered = delivery.redelivered,
                    "message processed"
                );
                Ok(Outcome::Acked)
            }
            Err(HandlerError::Malformed(reason)) => {
                error!(queue = %self.queue, message_id = %message_id, reason = %reason, "malformed event discarded");
                self.channel.nack(delivery.tag, false).await?;
                Ok(Outcome::Discarded)
            }
            Err(HandlerError::Failed(reason)) => {
                let requeue = self.policy == FailurePolicy::Requeue;
                error!(
                    queue = %self.queue,
                    message_id = %message_id,
                    event_type = %event_type,
                    reason = %reason,
                    requeue,
                    "message handling failed"
                );
                self.channel.nack(delivery.tag, requeue).await?;
                Ok(if requeue {
                    Outcome::Requeued
                } else {
                    Outcome::Discarded
                })
            }
        }
    }

    /// Consumes until the delivery stream ends, which only happens when the
    /// broker connection is gone.
    pub async fn run(mut self, handler: Arc<dyn EventHandler>) -> Result<(), BrokerError> {
        let mut deliveries = self.channel.subscribe(&self.queue).await?;
        info!(queue = %self.queue, policy = ?self.policy, "consumer started");

        while let Some(delivery) = deliveries.recv().await {
            if let Err(err) = self.process(delivery, handler.as_ref()).await {
                error!(queue = %self.queue, error = %err, "failed to settle delivery");
            }
        }

        error!(queue = %self.queue, "delivery stream closed; consumer stopped");
        Err(BrokerError::Unavailable(format!(
            "consumer on {} lost its delivery stream",
            self.queue
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use orderflow_core::{EventType, NewOrder, Order, OrderItem};
    use rust_decimal::Decimal;

    use super::*;
    use crate::broker::{Binding, Broker, DeliveryTag, ExchangeSpec, OutgoingMessage, QueueSpec};
    use crate::memory::MemoryBroker;
    use crate::publisher::{PublishMode, Publisher};

    const QUEUE: &str = "restaurant_orders_queue";

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: OrderEvent) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event.message_id.to_string());
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(HandlerError::failed("store unavailable"));
            }
            Ok(())
        }
    }

    fn event() -> OrderEvent {
        let new_order = NewOrder::new(
            "user-1",
            "rest-1",
            vec![OrderItem {
                item_id: "soup".to_string(),
                name: String::new(),
                unit_price: Decimal::new(800, 2),
                quantity: 1,
            }],
            "2 High St",
        )
        .unwrap();
        OrderEvent::for_order(EventType::OrderCreated, &Order::place(new_order, Utc::now()))
    }

    async fn setup(policy: FailurePolicy) -> (Arc<MemoryBroker>, Publisher, Consumer) {
        let broker = Arc::new(MemoryBroker::new());
        let channel = Channel::open(broker.clone());
        channel
            .declare_exchange(ExchangeSpec::topic("orders"))
            .await
            .unwrap();
        channel
            .declare_queue(QueueSpec::durable(QUEUE))
            .await
            .unwrap();
        channel
            .bind(Binding::new(QUEUE, "orders", "order.*"))
            .await
            .unwrap();
        let publisher = Publisher::new(channel.clone(), PublishMode::Confirmed);
        let consumer = Consumer::new(
            channel,
            QUEUE,
            policy,
            DedupCache::new(100, Duration::from_secs(3600)),
        );
        (broker, publisher, consumer)
    }

    async fn next(
        deliveries: &mut tokio::sync::mpsc::Receiver<Delivery>,
    ) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), deliveries.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_message_ids_reach_the_handler_once() {
        let (broker, publisher, mut consumer) = setup(FailurePolicy::Requeue).await;
        let handler = Recorder::default();
        let event = event();

        publisher.publish("orders", event.routing_key(), &event).await.unwrap();
        publisher.publish("orders", event.routing_key(), &event).await.unwrap();

        let mut deliveries = broker.subscribe(QUEUE).await.unwrap();
        let first = consumer.process(next(&mut deliveries).await, &handler).await.unwrap();
        let second = consumer.process(next(&mut deliveries).await, &handler).await.unwrap();

        assert_eq!(first, Outcome::Acked);
        assert_eq!(second, Outcome::Duplicate);
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
        assert_eq!(broker.queue_depth(QUEUE), Some((0, 0)));
    }

    #[tokio::test]
    async fn failed_handling_is_requeued_and_retried() {
        let (broker, publisher, mut consumer) = setup(FailurePolicy::Requeue).await;
        let handler = Recorder {
            failures_left: Mutex::new(1),
            ..Recorder::default()
        };
        let event = event();
        publisher.publish("orders", event.routing_key(), &event).await.unwrap();

        let mut deliveries = broker.subscribe(QUEUE).await.unwrap();
        let first = consumer.process(next(&mut deliveries).await, &handler).await.unwrap();
        assert_eq!(first, Outcome::Requeued);

        let retry = next(&mut deliveries).await;
        assert!(retry.redelivered);
        let second = consumer.process(retry, &handler).await.unwrap();
        assert_eq!(second, Outcome::Acked);
        assert_eq!(handler.seen.lock().unwrap().len(), 2);
        assert_eq!(broker.queue_depth(QUEUE), Some((0, 0)));
    }

    #[tokio::test]
    async fn failed_handling_is_dropped_under_discard() {
        let (broker, publisher, mut consumer) = setup(FailurePolicy::Discard).await;
        let handler = Recorder {
            failures_left: Mutex::new(1),
            ..Recorder::default()
        };
        let event = event();
        publisher.publish("orders", event.routing_key(), &event).await.unwrap();

        let mut deliveries = broker.subscribe(QUEUE).await.unwrap();
        let outcome = consumer.process(next(&mut deliveries).await, &handler).await.unwrap();
        assert_eq!(outcome, Outcome::Discarded);
        assert_eq!(broker.queue_depth(QUEUE), Some((0, 0)));
    }

    #[tokio::test]
    async fn undecodable_payloads_are_never_requeued() {
        let (broker, _publisher, mut consumer) = setup(FailurePolicy::Requeue).await;
        let handler = Recorder::default();
        broker
            .publish(OutgoingMessage {
                exchange: "orders".to_string(),
                routing_key: "order.created".to_string(),
                message_id: "garbage-1".to_string(),
                persistent: true,
                body: b"not json".to_vec(),
            })
            .await
            .unwrap();

        let mut deliveries = broker.subscribe(QUEUE).await.unwrap();
        let outcome = consumer.process(next(&mut deliveries).await, &handler).await.unwrap();
        assert_eq!(outcome, Outcome::Discarded);
        assert!(handler.seen.lock().unwrap().is_empty());
        assert_eq!(broker.queue_depth(QUEUE), Some((0, 0)));
    }

    #[tokio::test]
    async fn missing_message_id_falls_back_to_the_body() {
        let (_broker, _publisher, mut consumer) = setup(FailurePolicy::Requeue).await;
        let handler = Recorder::default();
        let body = serde_json::to_vec(&event()).unwrap();

        // Settling a tag the broker never issued fails, but only after the
        // handler ran; what matters here is the dedup key.
        let delivery = |id: &str| Delivery {
            tag: DeliveryTag {
                queue: QUEUE.to_string(),
                id: id.to_string(),
            },
            message_id: None,
            exchange: "orders".to_string(),
            routing_key: "order.created".to_string(),
            body: body.clone(),
            redelivered: false,
        };
        let _ = consumer.process(delivery("x1"), &handler).await;
        let _ = consumer.process(delivery("x2"), &handler).await;

        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_reports_a_lost_stream() {
        let (broker, publisher, consumer) = setup(FailurePolicy::Requeue).await;
        let handler: Arc<Recorder> = Arc::new(Recorder::default());
        let task = tokio::spawn(consumer.run(handler.clone()));

        let event = event();
        publisher.publish("orders", event.routing_key(), &event).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while broker.queue_depth(QUEUE) != Some((0, 0))
                || handler.seen.lock().unwrap().is_empty()
            {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // A second subscriber takes over the queue and closes the first stream.
        let _takeover = broker.subscribe(QUEUE).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(BrokerError::Unavailable(_))));
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }
}
