use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::OrderError;
use crate::events::{EventType, OrderEvent};
use crate::models::{Order, OrderFilter, OrderStatus};
use crate::outbox::OutboxEntry;
use crate::storage::{Insertion, OrderRepository};
use crate::transitions::Transition;

/// Which service owns a copy, and therefore which exchange its events go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerRole {
    Ordering,
    Restaurant,
    Delivery,
}

impl OwnerRole {
    pub fn exchange(&self) -> &'static str {
        match self {
            OwnerRole::Ordering => "orders",
            OwnerRole::Restaurant => "restaurant",
            OwnerRole::Delivery => "delivery",
        }
    }

    pub fn service_name(&self) -> &'static str {
        match self {
            OwnerRole::Ordering => "order-service",
            OwnerRole::Restaurant => "restaurant-service",
            OwnerRole::Delivery => "delivery-service",
        }
    }
}

/// Validates and applies transitions against one service's local copies.
#[derive(Clone)]
pub struct OrderStateMachine {
    role: OwnerRole,
    store: Arc<dyn OrderRepository>,
}

impl OrderStateMachine {
    pub fn new(role: OwnerRole, store: Arc<dyn OrderRepository>) -> Self {
        Self { role, store }
    }

    pub fn role(&self) -> OwnerRole {
        self.role
    }

    pub fn store(&self) -> &Arc<dyn OrderRepository> {
        &self.store
    }

    pub async fn create(&self, order: Order) -> Result<(Order, OutboxEntry), OrderError> {
        let entry = OutboxEntry::new(
            self.role.exchange(),
            OrderEvent::for_order(EventType::OrderCreated, &order),
        );
        match self.store.insert(order, Some(entry.clone())).await? {
            Insertion::Created(order) => Ok((order, entry)),
            Insertion::Existing(order) => Err(OrderError::conflict(
                format!("order {} already exists", order.order_id),
                order.status,
            )),
        }
    }

    /// Lazily creates the local copy from an incoming event. Redelivery of the
    /// same event finds the existing copy and leaves it alone.
    pub async fn adopt(&self, order: Order) -> Result<Insertion, OrderError> {
        self.store.insert(order, None).await
    }

    pub async fn transition(
        &self,
        order_id: Uuid,
        transition: Transition,
    ) -> Result<(Order, OutboxEntry), OrderError> {
        let exchange = self.role.exchange();
        let (order, entry) = self
            .store
            .mutate(
                order_id,
                Box::new(move |order: &mut Order| {
                    order.apply(&transition, Utc::now())?;
                    let event = OrderEvent::for_order(transition.event_type(), order);
                    Ok(Some(OutboxEntry::new(exchange, event)))
                }),
            )
            .await?;

        let entry = entry.ok_or_else(|| {
            OrderError::Storage("transition produced no outbox entry".to_string())
        })?;
        Ok((order, entry))
    }

    pub async fn mirror(&self, order_id: Uuid, transition: Transition) -> Result<Order, OrderError> {
        let (order, _) = self
            .store
            .mutate(
                order_id,
                Box::new(move |order: &mut Order| {
                    order.apply(&transition, Utc::now())?;
                    Ok(None)
                }),
            )
            .await?;
        Ok(order)
    }

    /// Folds a status learned from an event into the local copy. Returns
    /// `None` when there is no local copy to update.
    pub async fn project(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>, OrderError> {
        let result = self
            .store
            .mutate(
                order_id,
                Box::new(move |order: &mut Order| {
                    order.project(status, at);
                    Ok(None)
                }),
            )
            .await;

        match result {
            Ok((order, _)) => Ok(Some(order)),
            Err(OrderError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| OrderError::not_found(order_id))
    }

    pub async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, OrderError> {
        self.store.list(filter).await
    }
}
