use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orderflow_bus::{
    Channel, DELIVERY_ORDERS_QUEUE, DedupCache, EventHandler, FailurePolicy, HandlerError,
    OutboxRelay, PublishMode, Publisher, Topology,
};
use orderflow_core::{
    EventType, Insertion, Order, OrderEvent, OrderFilter, OrderRepository, OrderStateMachine,
    OrderStatus, OwnerRole, Transition,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::runtime::{ConsumerPlan, ServiceRuntime};

#[derive(Clone)]
pub struct DeliveryService {
    machine: OrderStateMachine,
    relay: OutboxRelay,
}

impl DeliveryService {
    pub const PUBLISH_MODE: PublishMode = PublishMode::FireAndForget;

    pub fn new(store: Arc<dyn OrderRepository>, channel: Channel) -> Self {
        let publisher = Publisher::new(channel, Self::PUBLISH_MODE);
        Self {
            machine: OrderStateMachine::new(OwnerRole::Delivery, store.clone()),
            relay: OutboxRelay::new(store, publisher),
        }
    }

    pub fn machine(&self) -> &OrderStateMachine {
        &self.machine
    }

    pub fn topology() -> Topology {
        Topology::delivery()
    }

    #[instrument(skip(self))]
    pub async fn pickup_order(&self, order_id: Uuid, driver_id: &str) -> Result<Order, ServiceError> {
        self.advance(
            order_id,
            Transition::PickUp {
                driver_id: driver_id.to_string(),
            },
        )
        .await
    }

    /// Only the driver recorded at pickup may deliver.
    #[instrument(skip(self))]
    pub async fn deliver_order(
        &self,
        order_id: Uuid,
        driver_id: &str,
    ) -> Result<Order, ServiceError> {
        self.advance(
            order_id,
            Transition::Deliver {
                driver_id: driver_id.to_string(),
            },
        )
        .await
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        Ok(self.machine.get(order_id).await?)
    }

    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, ServiceError> {
        Ok(self.machine.list(filter).await?)
    }

    /// Orders ready for a driver.
    pub async fn prepared_orders(&self) -> Result<Vec<Order>, ServiceError> {
        let filter = OrderFilter {
            status: Some(OrderStatus::Prepared),
            ..OrderFilter::default()
        };
        self.list_orders(&filter).await
    }

    pub fn event_handler(&self) -> DeliveryEvents {
        DeliveryEvents {
            machine: self.machine.clone(),
        }
    }

    pub async fn start(
        &self,
        channel: &Channel,
        dedup: DedupCache,
        outbox_poll: Duration,
    ) -> Result<ServiceRuntime, ServiceError> {
        let plan = ConsumerPlan {
            queue: DELIVERY_ORDERS_QUEUE,
            policy: FailurePolicy::Requeue,
            dedup,
        };
        let runtime = ServiceRuntime::start(
            channel,
            &Self::topology(),
            plan,
            Arc::new(self.event_handler()),
            self.relay.clone(),
            outbox_poll,
        )
        .await?;
        Ok(runtime)
    }

    async fn advance(&self, order_id: Uuid, transition: Transition) -> Result<Order, ServiceError> {
        let (order, _) = self.machine.transition(order_id, transition).await?;
        info!(
            order_id = %order.order_id,
            status = %order.status,
            driver_id = order.driver_id.as_deref().unwrap_or_default(),
            "delivery advanced"
        );

        self.relay.publish_order(order.order_id).await?;
        Ok(order)
    }
}

/// Creates the delivery copy when the kitchen reports an order prepared.
pub struct DeliveryEvents {
    machine: OrderStateMachine,
}

#[async_trait]
impl EventHandler for DeliveryEvents {
    async fn handle(&self, event: OrderEvent) -> Result<(), HandlerError> {
        if event.event_type != EventType::OrderPrepared {
            debug!(order_id = %event.order_id, event_type = %event.event_type, "event ignored");
            return Ok(());
        }

        let order = event
            .to_order()
            .map_err(|err| HandlerError::Malformed(err.to_string()))?;
        match self.machine.adopt(order).await.map_err(HandlerError::failed)? {
            Insertion::Created(order) => {
                info!(order_id = %order.order_id, "order ready for pickup");
            }
            Insertion::Existing(order) => {
                debug!(order_id = %order.order_id, status = %order.status, "order already known");
            }
        }
        Ok(())
    }
}
