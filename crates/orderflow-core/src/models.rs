use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::OrderError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Prepared,
    PickedUp,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Prepared => "PREPARED",
            OrderStatus::PickedUp => "PICKED_UP",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Position along the forward path. `Cancelled` sits off the path.
    pub fn progress(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Accepted => Some(1),
            OrderStatus::Prepared => Some(2),
            OrderStatus::PickedUp => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "ACCEPTED" => Ok(OrderStatus::Accepted),
            "PREPARED" => Ok(OrderStatus::Prepared),
            "PICKED_UP" => Ok(OrderStatus::PickedUp),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(OrderError::Validation(format!(
                "unsupported order status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub item_id: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl OrderItem {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// One service's local copy of an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: Uuid,
    pub restaurant_id: String,
    pub user_id: String,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
    pub delivery_address: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepared_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_up_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds the authoritative copy held by the ordering service.
    pub fn place(new_order: NewOrder, now: DateTime<Utc>) -> Self {
        let total_amount = new_order.total_amount();
        Self {
            order_id: Uuid::new_v4(),
            restaurant_id: new_order.restaurant_id,
            user_id: new_order.user_id,
            items: new_order.items,
            total_amount,
            delivery_address: new_order.delivery_address,
            status: OrderStatus::Pending,
            driver_id: None,
            created_at: now,
            accepted_at: None,
            prepared_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
            updated_at: now,
        }
    }
}

/// Validated order placement input.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: String,
    pub restaurant_id: String,
    pub items: Vec<OrderItem>,
    pub delivery_address: String,
}

impl NewOrder {
    pub fn new(
        user_id: &str,
        restaurant_id: &str,
        items: Vec<OrderItem>,
        delivery_address: &str,
    ) -> Result<Self, OrderError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(OrderError::Validation("userId is required".to_string()));
        }

        let restaurant_id = restaurant_id.trim();
        if restaurant_id.is_empty() {
            return Err(OrderError::Validation(
                "restaurantId is required".to_string(),
            ));
        }

        if items.is_empty() {
            return Err(OrderError::Validation(
                "at least one item is required".to_string(),
            ));
        }

        let mut normalized = Vec::with_capacity(items.len());
        for item in items {
            let item_id = item.item_id.trim().to_string();
            if item_id.is_empty() {
                return Err(OrderError::Validation("itemId is required".to_string()));
            }
            if item.quantity < 1 {
                return Err(OrderError::Validation(format!(
                    "quantity for item {item_id} must be at least 1"
                )));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(OrderError::Validation(format!(
                    "unitPrice for item {item_id} must be non-negative"
                )));
            }
            let name = match item.name.trim() {
                "" => item_id.clone(),
                name => name.to_string(),
            };
            normalized.push(OrderItem {
                item_id,
                name,
                unit_price: item.unit_price,
                quantity: item.quantity,
            });
        }

        Ok(Self {
            user_id: user_id.to_string(),
            restaurant_id: restaurant_id.to_string(),
            items: normalized,
            delivery_address: delivery_address.trim().to_string(),
        })
    }

    pub fn total_amount(&self) -> Decimal {
        self.items.iter().map(OrderItem::subtotal).sum()
    }
}

/// Filter for local order listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub restaurant_id: Option<String>,
    pub user_id: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|status| order.status == status)
            && self
                .restaurant_id
                .as_deref()
                .is_none_or(|id| order.restaurant_id == id)
            && self.user_id.as_deref().is_none_or(|id| order.user_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(item_id: &str, unit_price: Decimal, quantity: u32) -> OrderItem {
        OrderItem {
            item_id: item_id.to_string(),
            name: String::new(),
            unit_price,
            quantity,
        }
    }

    #[test]
    fn total_is_sum_of_subtotals() {
        let new_order = NewOrder::new(
            "u1",
            "r1",
            vec![
                item("i1", Decimal::new(500, 2), 2),
                item("i2", Decimal::new(250, 2), 1),
            ],
            "1 Main St",
        )
        .unwrap();

        assert_eq!(new_order.total_amount(), Decimal::new(1250, 2));
        assert_eq!(new_order.items[0].name, "i1");
    }

    #[test]
    fn placed_order_starts_pending() {
        let new_order =
            NewOrder::new("u1", "r1", vec![item("i1", Decimal::new(500, 2), 2)], "").unwrap();
        let order = Order::place(new_order, Utc::now());

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, Decimal::new(1000, 2));
        assert!(order.driver_id.is_none());
        assert_eq!(order.created_at, order.updated_at);
    }

    #[test]
    fn rejects_zero_quantity_and_missing_items() {
        let zero = NewOrder::new("u1", "r1", vec![item("i1", Decimal::ONE, 0)], "");
        assert!(matches!(zero, Err(OrderError::Validation(_))));

        let empty = NewOrder::new("u1", "r1", Vec::new(), "");
        assert!(matches!(empty, Err(OrderError::Validation(_))));

        let negative = NewOrder::new("u1", "r1", vec![item("i1", Decimal::NEGATIVE_ONE, 1)], "");
        assert!(matches!(negative, Err(OrderError::Validation(_))));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Accepted,
            OrderStatus::Prepared,
            OrderStatus::PickedUp,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("READY".parse::<OrderStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&OrderStatus::PickedUp).unwrap(),
            "\"PICKED_UP\""
        );
    }
}
