use tracing::info;

use crate::broker::{Binding, ExchangeSpec, QueueSpec};
use crate::channel::Channel;
use crate::error::BrokerError;

pub const ORDERS_EXCHANGE: &str = "orders";
pub const RESTAURANT_EXCHANGE: &str = "restaurant";
pub const DELIVERY_EXCHANGE: &str = "delivery";

pub const RESTAURANT_ORDERS_QUEUE: &str = "restaurant_orders_queue";
pub const DELIVERY_ORDERS_QUEUE: &str = "delivery_orders_queue";
pub const ORDER_STATUS_QUEUE: &str = "order_status_updates";

/// Exchanges, queues and bindings one service needs before it starts
/// consuming. Declared in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<Binding>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exchange(mut self, name: &str) -> Self {
        self.exchanges.push(ExchangeSpec::topic(name));
        self
    }

    pub fn queue(mut self, name: &str) -> Self {
        self.queues.push(QueueSpec::durable(name));
        self
    }

    pub fn bind(mut self, queue: &str, exchange: &str, pattern: &str) -> Self {
        self.bindings.push(Binding::new(queue, exchange, pattern));
        self
    }

    /// The ordering service owns the status aggregation queue and fans its
    /// creation events out to both the restaurant queue and itself.
    pub fn ordering() -> Self {
        Self::new()
            .exchange(ORDERS_EXCHANGE)
            .exchange(RESTAURANT_EXCHANGE)
            .exchange(DELIVERY_EXCHANGE)
            .queue(RESTAURANT_ORDERS_QUEUE)
            .queue(ORDER_STATUS_QUEUE)
            .bind(RESTAURANT_ORDERS_QUEUE, ORDERS_EXCHANGE, "order.*")
            .bind(ORDER_STATUS_QUEUE, ORDERS_EXCHANGE, "order.created")
            .bind(ORDER_STATUS_QUEUE, RESTAURANT_EXCHANGE, "order.*")
            .bind(ORDER_STATUS_QUEUE, DELIVERY_EXCHANGE, "order.*")
    }

    pub fn restaurant() -> Self {
        Self::new()
            .exchange(ORDERS_EXCHANGE)
            .exchange(RESTAURANT_EXCHANGE)
            .queue(RESTAURANT_ORDERS_QUEUE)
            .bind(RESTAURANT_ORDERS_QUEUE, ORDERS_EXCHANGE, "order.*")
    }

    pub fn delivery() -> Self {
        Self::new()
            .exchange(RESTAURANT_EXCHANGE)
            .exchange(DELIVERY_EXCHANGE)
            .queue(DELIVERY_ORDERS_QUEUE)
            .bind(DELIVERY_ORDERS_QUEUE, RESTAURANT_EXCHANGE, "order.prepared")
    }
}

pub struct TopologyManager;

impl TopologyManager {
    /// Declares everything the topology names. Stops at the first failure;
    /// callers treat that as fatal.
    pub async fn declare(channel: &Channel, topology: &Topology) -> Result<(), BrokerError> {
        for exchange in &topology.exchanges {
            channel.declare_exchange(exchange.clone()).await?;
        }
        for queue in &topology.queues {
            channel.declare_queue(queue.clone()).await?;
        }
        for binding in &topology.bindings {
            channel.bind(binding.clone()).await?;
        }

        info!(
            exchanges = topology.exchanges.len(),
            queues = topology.queues.len(),
            bindings = topology.bindings.len(),
            "broker topology declared"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::broker::Broker;
    use crate::memory::MemoryBroker;

    #[tokio::test]
    async fn presets_can_be_declared_by_every_service_in_any_order() {
        let broker = Arc::new(MemoryBroker::new());
        let channel = Channel::open(broker.clone());

        TopologyManager::declare(&channel, &Topology::delivery())
            .await
            .unwrap();
        TopologyManager::declare(&channel, &Topology::ordering())
            .await
            .unwrap();
        TopologyManager::declare(&channel, &Topology::restaurant())
            .await
            .unwrap();
        TopologyManager::declare(&channel, &Topology::ordering())
            .await
            .unwrap();

        for queue in [
            RESTAURANT_ORDERS_QUEUE,
            DELIVERY_ORDERS_QUEUE,
            ORDER_STATUS_QUEUE,
        ] {
            assert_eq!(broker.queue_depth(queue), Some((0, 0)));
        }
    }

    #[tokio::test]
    async fn conflicting_durability_fails_declaration() {
        let broker = Arc::new(MemoryBroker::new());
        broker
            .declare_queue(&QueueSpec {
                name: RESTAURANT_ORDERS_QUEUE.to_string(),
                durable: false,
            })
            .await
            .unwrap();
        let channel = Channel::open(broker);

        let err = TopologyManager::declare(&channel, &Topology::restaurant())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_declaration() {
        let broker = Arc::new(MemoryBroker::new());
        broker.set_connected(false);
        let channel = Channel::open(broker);

        let err = TopologyManager::declare(&channel, &Topology::delivery())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }

    #[test]
    fn created_events_fan_out_to_two_queues() {
        let topology = Topology::ordering();
        let created: Vec<&str> = topology
            .bindings
            .iter()
            .filter(|binding| {
                binding.exchange == ORDERS_EXCHANGE
                    && crate::topic::topic_matches(&binding.pattern, "order.created")
            })
            .map(|binding| binding.queue.as_str())
            .collect();
        assert_eq!(created, vec![RESTAURANT_ORDERS_QUEUE, ORDER_STATUS_QUEUE]);
    }
}
