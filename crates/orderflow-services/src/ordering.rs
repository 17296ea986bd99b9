use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use orderflow_bus::{
    Channel, DedupCache, EventHandler, FailurePolicy, HandlerError, ORDER_STATUS_QUEUE,
    OutboxRelay, PublishMode, Publisher, Topology,
};
use orderflow_core::{
    Catalog, MenuItem, Order, OrderError, OrderEvent, OrderFilter, OrderRepository, OrderRequest,
    OrderStateMachine, OwnerRole, Restaurant, Transition,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::runtime::{ConsumerPlan, ServiceRuntime};

/// Owns the authoritative order record and aggregates the status reported
/// by the downstream services.
#[derive(Clone)]
pub struct OrderingService {
    machine: OrderStateMachine,
    relay: OutboxRelay,
    catalog: Arc<Catalog>,
}

impl OrderingService {
    pub const PUBLISH_MODE: PublishMode = PublishMode::Confirmed;

    pub fn new(store: Arc<dyn OrderRepository>, channel: Channel, catalog: Arc<Catalog>) -> Self {
        let publisher = Publisher::new(channel, Self::PUBLISH_MODE);
        Self {
            machine: OrderStateMachine::new(OwnerRole::Ordering, store.clone()),
            relay: OutboxRelay::new(store, publisher),
            catalog,
        }
    }

    pub fn machine(&self) -> &OrderStateMachine {
        &self.machine
    }

    pub fn relay(&self) -> &OutboxRelay {
        &self.relay
    }

    pub fn topology() -> Topology {
        Topology::ordering()
    }

    /// Prices the request from the catalog, records the order and publishes
    /// ORDER_CREATED. A failed publish leaves the order stored with its
    /// event pending in the outbox.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, restaurant_id = %request.restaurant_id))]
    pub async fn place_order(&self, request: &OrderRequest) -> Result<Order, ServiceError> {
        let new_order = self.catalog.price(request)?;
        let order = Order::place(new_order, Utc::now());
        let (order, _) = self.machine.create(order).await?;
        info!(order_id = %order.order_id, total_amount = %order.total_amount, "order placed");

        self.relay.publish_order(order.order_id).await?;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let (order, _) = self.machine.transition(order_id, Transition::Cancel).await?;
        info!(order_id = %order.order_id, "order cancelled");

        self.relay.publish_order(order.order_id).await?;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        Ok(self.machine.get(order_id).await?)
    }

    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, ServiceError> {
        Ok(self.machine.list(filter).await?)
    }

    pub async fn orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, ServiceError> {
        let filter = OrderFilter {
            user_id: Some(user_id.to_string()),
            ..OrderFilter::default()
        };
        self.list_orders(&filter).await
    }

    pub fn restaurants(&self) -> &[Restaurant] {
        &self.catalog.restaurants
    }

    pub fn restaurant(&self, restaurant_id: &str) -> Result<&Restaurant, ServiceError> {
        self.catalog
            .restaurant(restaurant_id)
            .ok_or_else(|| OrderError::UnknownReference("Restaurant not found".to_string()).into())
    }

    pub fn menu(&self, restaurant_id: &str) -> Result<&[MenuItem], ServiceError> {
        Ok(&self.restaurant(restaurant_id)?.menu)
    }

    pub fn status_projection(&self) -> StatusProjection {
        StatusProjection {
            machine: self.machine.clone(),
        }
    }

    /// Declares the topology and starts the status consumer and outbox relay.
    pub async fn start(
        &self,
        channel: &Channel,
        dedup: DedupCache,
        outbox_poll: std::time::Duration,
    ) -> Result<ServiceRuntime, ServiceError> {
        let plan = ConsumerPlan {
            queue: ORDER_STATUS_QUEUE,
            policy: FailurePolicy::Discard,
            dedup,
        };
        let runtime = ServiceRuntime::start(
            channel,
            &Self::topology(),
            plan,
            Arc::new(self.status_projection()),
            self.relay.clone(),
            outbox_poll,
        )
        .await?;
        Ok(runtime)
    }
}

/// Folds status events from every exchange into the ordering service's
/// copy, never moving it backwards.
pub struct StatusProjection {
    machine: OrderStateMachine,
}

#[async_trait]
impl EventHandler for StatusProjection {
    async fn handle(&self, event: OrderEvent) -> Result<(), HandlerError> {
        let status = event.event_type.implied_status();

        match self
            .machine
            .project(event.order_id, status, event.transition_time())
            .await
        {
            Ok(Some(order)) if order.status == status => {
                info!(order_id = %event.order_id, status = %order.status, "order status updated");
            }
            Ok(Some(order)) => {
                debug!(
                    order_id = %event.order_id,
                    incoming = %status,
                    current = %order.status,
                    "stale status event ignored"
                );
            }
            Ok(None) => {
                warn!(order_id = %event.order_id, event_type = %event.event_type, "status event for unknown order");
            }
            Err(err) => return Err(HandlerError::failed(err)),
        }
        Ok(())
    }
}
