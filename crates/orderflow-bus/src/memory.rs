use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::broker::{
    Binding, Broker, Delivery, DeliveryTag, ExchangeSpec, OutgoingMessage, QueueSpec,
};
use crate::error::BrokerError;
use crate::topic::topic_matches;

const PREFETCH: usize = 64;

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<String, StoredMessage>,
    consumer: Option<mpsc::Sender<Delivery>>,
}

impl QueueState {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            consumer: None,
        }
    }

    /// Pushes ready messages to the consumer until its prefetch window fills.
    fn pump(&mut self, next_tag: &mut u64) {
        while let Some(consumer) = self.consumer.clone() {
            let Some(message) = self.ready.pop_front() else {
                break;
            };

            *next_tag += 1;
            let tag = DeliveryTag {
                queue: self.spec.name.clone(),
                id: next_tag.to_string(),
            };
            let delivery = Delivery {
                tag: tag.clone(),
                message_id: Some(message.message_id.clone()),
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                body: message.body.clone(),
                redelivered: message.redelivered,
            };

            match consumer.try_send(delivery) {
                Ok(()) => {
                    self.unacked.insert(tag.id, message);
                }
                Err(TrySendError::Full(_)) => {
                    self.ready.push_front(message);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    self.ready.push_front(message);
                    self.consumer = None;
                }
            }
        }
    }

    /// Everything in flight goes back to the head of the queue, flagged as a
    /// redelivery, as when a consumer's channel closes.
    fn requeue_unacked(&mut self) {
        let mut inflight: Vec<(u64, StoredMessage)> = self
            .unacked
            .drain()
            .map(|(tag, message)| (tag.parse().unwrap_or_default(), message))
            .collect();
        inflight.sort_by_key(|(tag, _)| *tag);
        for (_, mut message) in inflight.into_iter().rev() {
            message.redelivered = true;
            self.ready.push_front(message);
        }
    }
}

#[derive(Default)]
struct State {
    disconnected: bool,
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    next_tag: u64,
}

/// In-process topic broker with durable declarations, manual acks and
/// requeue, for single-process runs and tests.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the broker connection.
    pub fn set_connected(&self, connected: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.disconnected = !connected;
        }
    }

    /// `(ready, unacked)` message counts for a queue.
    pub fn queue_depth(&self, queue: &str) -> Option<(usize, usize)> {
        let state = self.state.lock().ok()?;
        state
            .queues
            .get(queue)
            .map(|queue| (queue.ready.len(), queue.unacked.len()))
    }

    fn connected_state(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        let state = self
            .state
            .lock()
            .map_err(|_| BrokerError::Unavailable("broker state poisoned".to_string()))?;
        if state.disconnected {
            return Err(BrokerError::Unavailable("connection closed".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        let mut state = self.connected_state()?;
        match state.exchanges.get(&spec.name) {
            Some(existing) if existing == spec => Ok(()),
            Some(_) => Err(BrokerError::PreconditionFailed(format!(
                "exchange {} already declared with different parameters",
                spec.name
            ))),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
        let mut state = self.connected_state()?;
        match state.queues.get(&spec.name) {
            Some(existing) if existing.spec == *spec => Ok(()),
            Some(_) => Err(BrokerError::PreconditionFailed(format!(
                "queue {} already declared with different parameters",
                spec.name
            ))),
            None => {
                state
                    .queues
                    .insert(spec.name.clone(), QueueState::new(spec.clone()));
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &Binding) -> Result<(), BrokerError> {
        let mut state = self.connected_state()?;
        if !state.exchanges.contains_key(&binding.exchange) {
            return Err(BrokerError::NotFound(format!(
                "exchange {}",
                binding.exchange
            )));
        }
        if !state.queues.contains_key(&binding.queue) {
            return Err(BrokerError::NotFound(format!("queue {}", binding.queue)));
        }
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<(), BrokerError> {
        let mut state = self.connected_state()?;
        if !state.exchanges.contains_key(&message.exchange) {
            return Err(BrokerError::NotFound(format!(
                "exchange {}",
                message.exchange
            )));
        }

        // A queue bound by several matching patterns still gets one copy.
        let targets: BTreeSet<String> = state
            .bindings
            .iter()
            .filter(|binding| {
                binding.exchange == message.exchange
                    && topic_matches(&binding.pattern, &message.routing_key)
            })
            .map(|binding| binding.queue.clone())
            .collect();

        let State {
            queues, next_tag, ..
        } = &mut *state;
        for name in targets {
            if let Some(queue) = queues.get_mut(&name) {
                queue.ready.push_back(StoredMessage {
                    message_id: message.message_id.clone(),
                    exchange: message.exchange.clone(),
                    routing_key: message.routing_key.clone(),
                    body: message.body.clone(),
                    redelivered: false,
                });
                queue.pump(next_tag);
            }
        }

        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let mut state = self.connected_state()?;
        let State {
            queues, next_tag, ..
        } = &mut *state;
        let queue = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue {queue}")))?;

        let (sender, receiver) = mpsc::channel(PREFETCH);
        queue.requeue_unacked();
        queue.consumer = Some(sender);
        queue.pump(next_tag);

        Ok(receiver)
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<(), BrokerError> {
        let mut state = self.connected_state()?;
        let State {
            queues, next_tag, ..
        } = &mut *state;
        let queue = queues
            .get_mut(&tag.queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue {}", tag.queue)))?;

        if queue.unacked.remove(&tag.id).is_none() {
            return Err(BrokerError::PreconditionFailed(format!(
                "unknown delivery tag {}",
                tag.id
            )));
        }
        queue.pump(next_tag);
        Ok(())
    }

    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.connected_state()?;
        let State {
            queues, next_tag, ..
        } = &mut *state;
        let queue = queues
            .get_mut(&tag.queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue {}", tag.queue)))?;

        let mut message = queue.unacked.remove(&tag.id).ok_or_else(|| {
            BrokerError::PreconditionFailed(format!("unknown delivery tag {}", tag.id))
        })?;
        if requeue {
            message.redelivered = true;
            queue.ready.push_front(message);
        }
        queue.pump(next_tag);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state
            .lock()
            .map(|state| !state.disconnected)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker_with_queue() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker
            .declare_exchange(&ExchangeSpec::topic("orders"))
            .await
            .unwrap();
        broker
            .declare_queue(&QueueSpec::durable("restaurant_orders_queue"))
            .await
            .unwrap();
        broker
            .bind_queue(&Binding::new("restaurant_orders_queue", "orders", "order.*"))
            .await
            .unwrap();
        broker
    }

    fn message(routing_key: &str, message_id: &str) -> OutgoingMessage {
        OutgoingMessage {
            exchange: "orders".to_string(),
            routing_key: routing_key.to_string(),
            message_id: message_id.to_string(),
            persistent: true,
            body: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn redeclaration_is_idempotent_unless_it_conflicts() {
        let broker = broker_with_queue().await;
        broker
            .declare_exchange(&ExchangeSpec::topic("orders"))
            .await
            .unwrap();

        let transient = QueueSpec {
            name: "restaurant_orders_queue".to_string(),
            durable: false,
        };
        let err = broker.declare_queue(&transient).await.unwrap_err();
        assert!(matches!(err, BrokerError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn messages_wait_for_a_consumer_and_for_ack() {
        let broker = broker_with_queue().await;
        broker.publish(message("order.created", "m1")).await.unwrap();
        assert_eq!(broker.queue_depth("restaurant_orders_queue"), Some((1, 0)));

        let mut deliveries = broker.subscribe("restaurant_orders_queue").await.unwrap();
        let delivery = deliveries.recv().await.unwrap();
        assert_eq!(delivery.message_id.as_deref(), Some("m1"));
        assert!(!delivery.redelivered);
        assert_eq!(broker.queue_depth("restaurant_orders_queue"), Some((0, 1)));

        broker.ack(&delivery.tag).await.unwrap();
        assert_eq!(broker.queue_depth("restaurant_orders_queue"), Some((0, 0)));
    }

    #[tokio::test]
    async fn requeue_redelivers_and_drop_discards() {
        let broker = broker_with_queue().await;
        let mut deliveries = broker.subscribe("restaurant_orders_queue").await.unwrap();
        broker.publish(message("order.created", "m1")).await.unwrap();

        let first = deliveries.recv().await.unwrap();
        broker.nack(&first.tag, true).await.unwrap();
        let second = deliveries.recv().await.unwrap();
        assert_eq!(second.message_id.as_deref(), Some("m1"));
        assert!(second.redelivered);
        assert_ne!(first.tag, second.tag);

        broker.nack(&second.tag, false).await.unwrap();
        assert_eq!(broker.queue_depth("restaurant_orders_queue"), Some((0, 0)));
    }

    #[tokio::test]
    async fn resubscribing_redelivers_unacked_messages() {
        let broker = broker_with_queue().await;
        let mut crashed = broker.subscribe("restaurant_orders_queue").await.unwrap();
        broker.publish(message("order.created", "m1")).await.unwrap();
        let _lost = crashed.recv().await.unwrap();
        drop(crashed);

        let mut restarted = broker.subscribe("restaurant_orders_queue").await.unwrap();
        let again = restarted.recv().await.unwrap();
        assert_eq!(again.message_id.as_deref(), Some("m1"));
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn fan_out_reaches_every_matching_queue_once() {
        let broker = broker_with_queue().await;
        broker
            .declare_queue(&QueueSpec::durable("order_status_updates"))
            .await
            .unwrap();
        broker
            .bind_queue(&Binding::new("order_status_updates", "orders", "order.created"))
            .await
            .unwrap();
        broker
            .bind_queue(&Binding::new("order_status_updates", "orders", "order.#"))
            .await
            .unwrap();

        broker.publish(message("order.created", "m1")).await.unwrap();
        broker.publish(message("order.cancelled", "m2")).await.unwrap();

        assert_eq!(broker.queue_depth("restaurant_orders_queue"), Some((2, 0)));
        assert_eq!(broker.queue_depth("order_status_updates"), Some((2, 0)));
    }

    #[tokio::test]
    async fn disconnected_broker_rejects_operations() {
        let broker = broker_with_queue().await;
        broker.set_connected(false);
        assert!(!broker.is_connected().await);
        assert!(matches!(
            broker.publish(message("order.created", "m1")).await,
            Err(BrokerError::Unavailable(_))
        ));

        broker.set_connected(true);
        broker.publish(message("order.created", "m1")).await.unwrap();
    }

    #[tokio::test]
    async fn publishing_to_unknown_exchange_fails() {
        let broker = MemoryBroker::new();
        let err = broker
            .publish(message("order.created", "m1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }
}
