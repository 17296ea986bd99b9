use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::OrderError;
use crate::models::{Order, OrderFilter};
use crate::outbox::OutboxEntry;

/// Read-validate-write step run atomically against one record. Returning
/// an entry queues it in the outbox within the same write.
pub type Mutation =
    Box<dyn FnOnce(&mut Order) -> Result<Option<OutboxEntry>, OrderError> + Send>;

#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    Created(Order),
    Existing(Order),
}

impl Insertion {
    pub fn order(&self) -> &Order {
        match self {
            Insertion::Created(order) | Insertion::Existing(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Insertion::Created(order) | Insertion::Existing(order) => order,
        }
    }

    pub fn created(&self) -> bool {
        matches!(self, Insertion::Created(_))
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts `order` unless a record with the same id already exists.
    /// The outbox entry is only written when the order is created.
    async fn insert(
        &self,
        order: Order,
        outbox: Option<OutboxEntry>,
    ) -> Result<Insertion, OrderError>;
    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, OrderError>;
    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, OrderError>;
    /// Returns the updated record and the outbox entry written with it.
    async fn mutate(
        &self,
        order_id: Uuid,
        mutation: Mutation,
    ) -> Result<(Order, Option<OutboxEntry>), OrderError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Pending entries, oldest first.
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, OrderError>;
    /// Pending entries for one order, oldest first.
    async fn pending_for_order(&self, order_id: Uuid) -> Result<Vec<OutboxEntry>, OrderError>;
    async fn mark_published(&self, entry_id: Uuid, at: DateTime<Utc>) -> Result<(), OrderError>;
    async fn record_failure(&self, entry_id: Uuid, error: &str) -> Result<(), OrderError>;
}

/// A service's whole local database: its order copies plus their outbox.
pub trait OrderRepository: OrderStore + OutboxStore {}

impl<T: OrderStore + OutboxStore> OrderRepository for T {}
