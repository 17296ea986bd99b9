use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orderflow_bus::{
    Channel, DedupCache, EventHandler, FailurePolicy, HandlerError, OutboxRelay, PublishMode,
    Publisher, RESTAURANT_ORDERS_QUEUE, Topology,
};
use orderflow_core::{
    EventType, Insertion, Order, OrderError, OrderEvent, OrderFilter, OrderRepository,
    OrderStateMachine, OrderStatus, OwnerRole, Transition,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::runtime::{ConsumerPlan, ServiceRuntime};

#[derive(Clone)]
pub struct RestaurantService {
    machine: OrderStateMachine,
    relay: OutboxRelay,
}

impl RestaurantService {
    pub const PUBLISH_MODE: PublishMode = PublishMode::FireAndForget;

    pub fn new(store: Arc<dyn OrderRepository>, channel: Channel) -> Self {
        let publisher = Publisher::new(channel, Self::PUBLISH_MODE);
        Self {
            machine: OrderStateMachine::new(OwnerRole::Restaurant, store.clone()),
            relay: OutboxRelay::new(store, publisher),
        }
    }

    pub fn machine(&self) -> &OrderStateMachine {
        &self.machine
    }

    pub fn topology() -> Topology {
        Topology::restaurant()
    }

    #[instrument(skip(self))]
    pub async fn accept_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.advance(order_id, Transition::Accept).await
    }

    #[instrument(skip(self))]
    pub async fn prepare_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.advance(order_id, Transition::Prepare).await
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        Ok(self.machine.get(order_id).await?)
    }

    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, ServiceError> {
        Ok(self.machine.list(filter).await?)
    }

    /// Orders waiting for a restaurant to accept them.
    pub async fn pending_orders(&self, restaurant_id: &str) -> Result<Vec<Order>, ServiceError> {
        let filter = OrderFilter {
            status: Some(OrderStatus::Pending),
            restaurant_id: Some(restaurant_id.to_string()),
            user_id: None,
        };
        self.list_orders(&filter).await
    }

    pub fn event_handler(&self) -> RestaurantEvents {
        RestaurantEvents {
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
            queue: RESTAURANT_ORDERS_QUEUE,
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
        info!(order_id = %order.order_id, status = %order.status, "restaurant order advanced");

        self.relay.publish_order(order.order_id).await?;
        Ok(order)
    }
}

/// Handles events arriving on the restaurant queue.
pub struct RestaurantEvents {
    machine: OrderStateMachine,
}

#[async_trait]
impl EventHandler for RestaurantEvents {
    async fn handle(&self, event: OrderEvent) -> Result<(), HandlerError> {
        match event.event_type {
            EventType::OrderCreated => {
                let order = event
                    .to_order()
                    .map_err(|err| HandlerError::Malformed(err.to_string()))?;
                match self.machine.adopt(order).await.map_err(HandlerError::failed)? {
                    Insertion::Created(order) => {
                        info!(order_id = %order.order_id, restaurant_id = %order.restaurant_id, "new order received");
                    }
                    Insertion::Existing(order) => {
                        debug!(order_id = %order.order_id, "order already known");
                    }
                }
            }
            EventType::OrderCancelled => {
                match self.machine.mirror(event.order_id, Transition::Cancel).await {
                    Ok(order) => info!(order_id = %order.order_id, "order cancelled by customer"),
                    Err(err @ OrderError::NotFound { .. }) => {
                        // Requeued until the creation event lands.
                        warn!(order_id = %event.order_id, "cancellation arrived before the order");
                        return Err(HandlerError::failed(err));
                    }
                    Err(OrderError::Conflict { current, .. }) => {
                        warn!(order_id = %event.order_id, current = %current, "cancellation arrived after the order advanced");
                    }
                    Err(err) => return Err(HandlerError::failed(err)),
                }
            }
            other => {
                debug!(order_id = %event.order_id, event_type = %other, "event ignored");
            }
        }
        Ok(())
    }
}
