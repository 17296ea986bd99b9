use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::OrderError;
use crate::models::{NewOrder, OrderItem};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cuisine: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub menu: Vec<MenuItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub item_id: String,
    pub quantity: u32,
}

/// What a customer asks for. Prices come from the catalog, never the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub user_id: String,
    pub restaurant_id: String,
    pub lines: Vec<OrderLine>,
    pub delivery_address: Option<String>,
}

/// Restaurants, their menus and the known customers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub restaurants: Vec<Restaurant>,
    #[serde(default)]
    pub users: Vec<Customer>,
}

impl Catalog {
    pub fn restaurant(&self, restaurant_id: &str) -> Option<&Restaurant> {
        self.restaurants
            .iter()
            .find(|restaurant| restaurant.id == restaurant_id)
    }

    pub fn menu_item(&self, restaurant_id: &str, item_id: &str) -> Option<&MenuItem> {
        self.restaurant(restaurant_id)?
            .menu
            .iter()
            .find(|item| item.id == item_id)
    }

    pub fn user(&self, user_id: &str) -> Option<&Customer> {
        self.users.iter().find(|user| user.id == user_id)
    }

    /// Resolves the customer, restaurant and every line against the catalog
    /// and prices the order. The delivery address falls back to the
    /// customer's own.
    pub fn price(&self, request: &OrderRequest) -> Result<NewOrder, OrderError> {
        let user_id = required(&request.user_id, "userId")?;
        let restaurant_id = required(&request.restaurant_id, "restaurantId")?;
        if request.lines.is_empty() {
            return Err(OrderError::Validation(
                "at least one item is required".to_string(),
            ));
        }

        let user = self
            .user(user_id)
            .ok_or_else(|| OrderError::UnknownReference("User not found".to_string()))?;
        if self.restaurant(restaurant_id).is_none() {
            return Err(OrderError::UnknownReference(
                "Restaurant not found".to_string(),
            ));
        }

        let mut items = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let item_id = required(&line.item_id, "itemId")?;
            let menu_item = self.menu_item(restaurant_id, item_id).ok_or_else(|| {
                OrderError::UnknownReference(format!(
                    "Menu item {item_id} not found in restaurant {restaurant_id}"
                ))
            })?;
            items.push(OrderItem {
                item_id: menu_item.id.clone(),
                name: menu_item.name.clone(),
                unit_price: menu_item.price,
                quantity: line.quantity,
            });
        }

        let delivery_address = request
            .delivery_address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .unwrap_or(user.address.as_str());

        NewOrder::new(user_id, restaurant_id, items, delivery_address)
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, OrderError> {
    match value.trim() {
        "" => Err(OrderError::Validation(format!("{field} is required"))),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn catalog() -> Catalog {
        serde_json::from_value(json!({
            "restaurants": [{
                "id": "rest-1",
                "name": "Pasta Place",
                "cuisine": "Italian",
                "menu": [
                    { "id": "carbonara", "name": "Carbonara", "price": "12.50" },
                    { "id": "tiramisu", "name": "Tiramisu", "price": "6.00" }
                ]
            }],
            "users": [{ "id": "user-1", "name": "Ada", "address": "7 Harbour Rd" }]
        }))
        .unwrap()
    }

    fn request(lines: &[(&str, u32)], address: Option<&str>) -> OrderRequest {
        OrderRequest {
            user_id: "user-1".to_string(),
            restaurant_id: "rest-1".to_string(),
            lines: lines
                .iter()
                .map(|(item_id, quantity)| OrderLine {
                    item_id: item_id.to_string(),
                    quantity: *quantity,
                })
                .collect(),
            delivery_address: address.map(str::to_string),
        }
    }

    #[test]
    fn prices_lines_from_the_menu() {
        let new_order = catalog()
            .price(&request(&[("carbonara", 2), ("tiramisu", 1)], Some("1 Quay St")))
            .unwrap();

        assert_eq!(new_order.items[0].name, "Carbonara");
        assert_eq!(new_order.items[0].unit_price, Decimal::new(1250, 2));
        assert_eq!(new_order.total_amount(), Decimal::new(3100, 2));
        assert_eq!(new_order.delivery_address, "1 Quay St");
    }

    #[test]
    fn address_defaults_to_the_customer() {
        let new_order = catalog()
            .price(&request(&[("tiramisu", 1)], Some("  ")))
            .unwrap();
        assert_eq!(new_order.delivery_address, "7 Harbour Rd");
    }

    #[test]
    fn unknown_references_are_reported() {
        let catalog = catalog();

        let mut stranger = request(&[("tiramisu", 1)], None);
        stranger.user_id = "user-9".to_string();
        assert_eq!(
            catalog.price(&stranger).unwrap_err(),
            OrderError::UnknownReference("User not found".to_string())
        );

        let mut elsewhere = request(&[("tiramisu", 1)], None);
        elsewhere.restaurant_id = "rest-9".to_string();
        assert_eq!(
            catalog.price(&elsewhere).unwrap_err(),
            OrderError::UnknownReference("Restaurant not found".to_string())
        );

        let off_menu = catalog.price(&request(&[("pizza", 1)], None)).unwrap_err();
        assert_eq!(
            off_menu.to_string(),
            "Menu item pizza not found in restaurant rest-1"
        );
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let catalog = catalog();
        assert!(matches!(
            catalog.price(&request(&[], None)),
            Err(OrderError::Validation(_))
        ));

        let mut anonymous = request(&[("tiramisu", 1)], None);
        anonymous.user_id = " ".to_string();
        assert!(matches!(
            catalog.price(&anonymous),
            Err(OrderError::Validation(_))
        ));

        assert!(matches!(
            catalog.price(&request(&[("tiramisu", 0)], None)),
            Err(OrderError::Validation(_))
        ));
    }
}
