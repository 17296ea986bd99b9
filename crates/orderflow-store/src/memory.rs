use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_core::{
    Insertion, Mutation, Order, OrderError, OrderFilter, OrderStore, OutboxEntry, OutboxStore,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    // Pending entries only; publication removes them.
    outbox: VecDeque<OutboxEntry>,
}

/// Process-local store. Orders and outbox share one lock so a mutation and
/// its outbox entry land together.
#[derive(Default)]
pub struct InMemoryOrderStore {
    tables: RwLock<Tables>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries still waiting for the relay.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.tables.read().await.outbox.iter().cloned().collect()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(
        &self,
        order: Order,
        outbox: Option<OutboxEntry>,
    ) -> Result<Insertion, OrderError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.orders.get(&order.order_id) {
            return Ok(Insertion::Existing(existing.clone()));
        }

        tables.orders.insert(order.order_id, order.clone());
        if let Some(entry) = outbox {
            tables.outbox.push_back(entry);
        }

        Ok(Insertion::Created(order))
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, OrderError> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(&order_id).cloned())
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, OrderError> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn mutate(
        &self,
        order_id: Uuid,
        mutation: Mutation,
    ) -> Result<(Order, Option<OutboxEntry>), OrderError> {
        let mut tables = self.tables.write().await;
        let mut order = tables
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| OrderError::not_found(order_id))?;

        let entry = mutation(&mut order)?;

        tables.orders.insert(order_id, order.clone());
        if let Some(entry) = &entry {
            tables.outbox.push_back(entry.clone());
        }

        Ok((order, entry))
    }
}

#[async_trait]
impl OutboxStore for InMemoryOrderStore {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, OrderError> {
        let tables = self.tables.read().await;
        Ok(tables.outbox.iter().take(limit).cloned().collect())
    }

    async fn pending_for_order(&self, order_id: Uuid) -> Result<Vec<OutboxEntry>, OrderError> {
        let tables = self.tables.read().await;
        Ok(tables
            .outbox
            .iter()
            .filter(|entry| entry.event.order_id == order_id)
            .cloned()
            .collect())
    }

    /// Drops the entry. Marking one that is already gone is a no-op, since
    /// the inline path and the relay can both publish it.
    async fn mark_published(&self, entry_id: Uuid, _at: DateTime<Utc>) -> Result<(), OrderError> {
        let mut tables = self.tables.write().await;
        tables.outbox.retain(|entry| entry.entry_id != entry_id);
        Ok(())
    }

    async fn record_failure(&self, entry_id: Uuid, error: &str) -> Result<(), OrderError> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .outbox
            .iter_mut()
            .find(|entry| entry.entry_id == entry_id)
            .ok_or_else(|| OrderError::Storage(format!("outbox entry {entry_id} not found")))?;

        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use orderflow_core::{EventType, NewOrder, OrderEvent, OrderItem, OrderStatus, Transition};
    use rust_decimal::Decimal;

    use super::*;

    fn placed(restaurant_id: &str) -> Order {
        let new_order = NewOrder::new(
            "u1",
            restaurant_id,
            vec![OrderItem {
                item_id: "i1".to_string(),
                name: String::new(),
                unit_price: Decimal::new(500, 2),
                quantity: 2,
            }],
            "1 Main St",
        )
        .unwrap();
        Order::place(new_order, Utc::now())
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_order_id() {
        let store = InMemoryOrderStore::new();
        let order = placed("r1");
        let entry = OutboxEntry::new("orders", OrderEvent::for_order(EventType::OrderCreated, &order));

        assert!(store.insert(order.clone(), Some(entry.clone())).await.unwrap().created());

        let mut changed = order.clone();
        changed.delivery_address = "elsewhere".to_string();
        let second = store.insert(changed, Some(entry)).await.unwrap();

        assert!(!second.created());
        assert_eq!(second.order().delivery_address, "1 Main St");
        assert_eq!(store.outbox_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_mutation_leaves_record_and_outbox_untouched() {
        let store = InMemoryOrderStore::new();
        let order = placed("r1");
        let order_id = order.order_id;
        store.insert(order, None).await.unwrap();

        let result = store
            .mutate(
                order_id,
                Box::new(|order: &mut Order| {
                    order.apply(&Transition::Prepare, Utc::now())?;
                    Ok(None)
                }),
            )
            .await;

        assert!(matches!(result, Err(OrderError::Conflict { .. })));
        let stored = store.get(order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert!(store.outbox_entries().await.is_empty());
    }

    #[tokio::test]
    async fn mutate_missing_order_is_not_found() {
        let store = InMemoryOrderStore::new();
        let missing = Uuid::new_v4();
        let result = store.mutate(missing, Box::new(|_: &mut Order| Ok(None))).await;
        assert_eq!(result.unwrap_err(), OrderError::not_found(missing));
    }

    #[tokio::test]
    async fn list_filters_and_sorts_newest_first() {
        let store = InMemoryOrderStore::new();
        let mut older = placed("r1");
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = placed("r1");
        let other = placed("r2");
        for order in [older.clone(), newer.clone(), other] {
            store.insert(order, None).await.unwrap();
        }

        let filter = OrderFilter {
            restaurant_id: Some("r1".to_string()),
            ..OrderFilter::default()
        };
        let listed = store.list(&filter).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|order| order.order_id).collect();
        assert_eq!(ids, vec![newer.order_id, older.order_id]);
    }

    #[tokio::test]
    async fn outbox_tracks_failures_and_publication() {
        let store = InMemoryOrderStore::new();
        let order = placed("r1");
        let entry = OutboxEntry::new("orders", OrderEvent::for_order(EventType::OrderCreated, &order));
        let entry_id = entry.entry_id;
        store.insert(order, Some(entry)).await.unwrap();

        store.record_failure(entry_id, "broker down").await.unwrap();
        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("broker down"));

        store.mark_published(entry_id, Utc::now()).await.unwrap();
        assert!(store.pending(10).await.unwrap().is_empty());
        assert!(store.outbox_entries().await.is_empty());
        store.mark_published(entry_id, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn published_entries_are_pruned_and_order_scoped_reads_keep_order() {
        let store = InMemoryOrderStore::new();
        let first = placed("r1");
        let second = placed("r1");
        let first_id = first.order_id;
        for order in [first, second] {
            let entry =
                OutboxEntry::new("orders", OrderEvent::for_order(EventType::OrderCreated, &order));
            store.insert(order, Some(entry)).await.unwrap();
        }
        store
            .mutate(
                first_id,
                Box::new(|order: &mut Order| {
                    order.apply(&Transition::Cancel, Utc::now())?;
                    let event = OrderEvent::for_order(EventType::OrderCancelled, order);
                    Ok(Some(OutboxEntry::new("orders", event)))
                }),
            )
            .await
            .unwrap();

        let scoped = store.pending_for_order(first_id).await.unwrap();
        let kinds: Vec<EventType> = scoped.iter().map(|entry| entry.event.event_type).collect();
        assert_eq!(kinds, vec![EventType::OrderCreated, EventType::OrderCancelled]);

        for entry in store.pending(10).await.unwrap() {
            store.mark_published(entry.entry_id, Utc::now()).await.unwrap();
        }
        assert!(store.outbox_entries().await.is_empty());
        assert!(store.pending_for_order(first_id).await.unwrap().is_empty());
    }
}
