use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::OrderError;
use crate::models::{Order, OrderItem, OrderStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OrderCreated,
    OrderCancelled,
    OrderAccepted,
    OrderPrepared,
    OrderPickedUp,
    OrderDelivered,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "ORDER_CREATED",
            EventType::OrderCancelled => "ORDER_CANCELLED",
            EventType::OrderAccepted => "ORDER_ACCEPTED",
            EventType::OrderPrepared => "ORDER_PREPARED",
            EventType::OrderPickedUp => "ORDER_PICKED_UP",
            EventType::OrderDelivered => "ORDER_DELIVERED",
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::OrderCancelled => "order.cancelled",
            EventType::OrderAccepted => "order.accepted",
            EventType::OrderPrepared => "order.prepared",
            EventType::OrderPickedUp => "order.pickedup",
            EventType::OrderDelivered => "order.delivered",
        }
    }

    /// Status an order reaches once this event has happened.
    pub fn implied_status(&self) -> OrderStatus {
        match self {
            EventType::OrderCreated => OrderStatus::Pending,
            EventType::OrderCancelled => OrderStatus::Cancelled,
            EventType::OrderAccepted => OrderStatus::Accepted,
            EventType::OrderPrepared => OrderStatus::Prepared,
            EventType::OrderPickedUp => OrderStatus::PickedUp,
            EventType::OrderDelivered => OrderStatus::Delivered,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker-level identity of one emission, used as the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// `{orderId}_{EVENT_TYPE}_{millis}_{uuid}`
    pub fn generate(order_id: Uuid, event_type: EventType, emitted_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}_{}_{}_{}",
            order_id,
            event_type.as_str(),
            emitted_at.timestamp_millis(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire record carried on the broker. Only the fields relevant to the
/// transition are populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub message_id: MessageId,
    pub event_type: EventType,
    pub order_id: Uuid,
    pub restaurant_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picked_up_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl OrderEvent {
    pub fn for_order(event_type: EventType, order: &Order) -> Self {
        let timestamp = Utc::now();
        let mut event = Self {
            message_id: MessageId::generate(order.order_id, event_type, timestamp),
            event_type,
            order_id: order.order_id,
            restaurant_id: order.restaurant_id.clone(),
            user_id: order.user_id.clone(),
            created_at: order.created_at,
            timestamp,
            items: None,
            total_amount: None,
            delivery_address: None,
            driver_id: None,
            accepted_at: None,
            prepared_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
        };

        match event_type {
            EventType::OrderCreated => {
                event.items = Some(order.items.clone());
                event.total_amount = Some(order.total_amount);
                event.delivery_address = Some(order.delivery_address.clone());
            }
            EventType::OrderCancelled => event.cancelled_at = order.cancelled_at,
            EventType::OrderAccepted => event.accepted_at = order.accepted_at,
            EventType::OrderPrepared => {
                event.items = Some(order.items.clone());
                event.total_amount = Some(order.total_amount);
                event.delivery_address = Some(order.delivery_address.clone());
                event.accepted_at = order.accepted_at;
                event.prepared_at = order.prepared_at;
            }
            EventType::OrderPickedUp => {
                event.driver_id = order.driver_id.clone();
                event.picked_up_at = order.picked_up_at;
            }
            EventType::OrderDelivered => {
                event.driver_id = order.driver_id.clone();
                event.picked_up_at = order.picked_up_at;
                event.delivered_at = order.delivered_at;
            }
        }

        event
    }

    pub fn routing_key(&self) -> &'static str {
        self.event_type.routing_key()
    }

    /// Domain time of the transition this event reports, falling back to
    /// the emission time.
    pub fn transition_time(&self) -> DateTime<Utc> {
        let at = match self.event_type {
            EventType::OrderCreated => Some(self.created_at),
            EventType::OrderCancelled => self.cancelled_at,
            EventType::OrderAccepted => self.accepted_at,
            EventType::OrderPrepared => self.prepared_at,
            EventType::OrderPickedUp => self.picked_up_at,
            EventType::OrderDelivered => self.delivered_at,
        };
        at.unwrap_or(self.timestamp)
    }

    /// Local copy sprung from the first event a downstream service cares
    /// about.
    pub fn to_order(&self) -> Result<Order, OrderError> {
        let status = match self.event_type {
            EventType::OrderCreated | EventType::OrderPrepared => {
                self.event_type.implied_status()
            }
            other => {
                return Err(OrderError::Validation(format!(
                    "{other} does not carry enough data to create a local order"
                )));
            }
        };
        let total_amount = self.total_amount.ok_or_else(|| {
            OrderError::Validation(format!("{} is missing totalAmount", self.event_type))
        })?;

        Ok(Order {
            order_id: self.order_id,
            restaurant_id: self.restaurant_id.clone(),
            user_id: self.user_id.clone(),
            items: self.items.clone().unwrap_or_default(),
            total_amount,
            delivery_address: self.delivery_address.clone().unwrap_or_default(),
            status,
            driver_id: None,
            created_at: self.created_at,
            accepted_at: self.accepted_at,
            prepared_at: self.prepared_at,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
            updated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::models::NewOrder;

    fn sample_order() -> Order {
        let new_order = NewOrder::new(
            "u1",
            "r1",
            vec![OrderItem {
                item_id: "i1".to_string(),
                name: "Dumplings".to_string(),
                unit_price: Decimal::new(500, 2),
                quantity: 2,
            }],
            "1 Main St",
        )
        .unwrap();
        Order::place(new_order, Utc::now())
    }

    #[test]
    fn created_event_uses_camel_case_wire_names() {
        let order = sample_order();
        let event = OrderEvent::for_order(EventType::OrderCreated, &order);
        let json: Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["eventType"], "ORDER_CREATED");
        assert_eq!(json["orderId"], order.order_id.to_string());
        assert_eq!(json["restaurantId"], "r1");
        assert_eq!(json["totalAmount"], "10.00");
        assert_eq!(json["items"][0]["itemId"], "i1");
        assert!(json.get("driverId").is_none());
        assert!(json["messageId"].as_str().unwrap().contains("_ORDER_CREATED_"));
    }

    #[test]
    fn message_ids_differ_for_same_instant() {
        let order_id = Uuid::new_v4();
        let at = Utc::now();
        let first = MessageId::generate(order_id, EventType::OrderAccepted, at);
        let second = MessageId::generate(order_id, EventType::OrderAccepted, at);
        assert_ne!(first, second);
    }

    #[test]
    fn created_event_rebuilds_pending_copy() {
        let order = sample_order();
        let event = OrderEvent::for_order(EventType::OrderCreated, &order);
        let copy = event.to_order().unwrap();

        assert_eq!(copy.order_id, order.order_id);
        assert_eq!(copy.status, OrderStatus::Pending);
        assert_eq!(copy.created_at, order.created_at);
        assert_eq!(copy.total_amount, order.total_amount);
        assert_eq!(copy.items, order.items);
    }

    #[test]
    fn status_only_events_cannot_create_copies() {
        let order = sample_order();
        let event = OrderEvent::for_order(EventType::OrderAccepted, &order);
        assert!(matches!(event.to_order(), Err(OrderError::Validation(_))));
    }

    #[test]
    fn routing_keys_match_wire_contract() {
        assert_eq!(EventType::OrderPickedUp.routing_key(), "order.pickedup");
        assert_eq!(EventType::OrderCancelled.routing_key(), "order.cancelled");
        assert_eq!(
            EventType::OrderDelivered.implied_status(),
            OrderStatus::Delivered
        );
    }
}
