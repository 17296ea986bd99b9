use orderflow_core::{OrderError, OrderFilter, OrderLine, OrderRequest, OrderStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub item_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

/// Placement body. Prices are looked up server-side, so none are accepted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub restaurant_id: String,
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub delivery_address: Option<String>,
}

impl CreateOrderRequest {
    pub fn into_order_request(self) -> OrderRequest {
        OrderRequest {
            user_id: self.user_id,
            restaurant_id: self.restaurant_id,
            lines: self
                .items
                .into_iter()
                .map(|item| OrderLine {
                    item_id: item.item_id,
                    quantity: item.quantity,
                })
                .collect(),
            delivery_address: self.delivery_address,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRequest {
    pub driver_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListQuery {
    pub status: Option<String>,
    pub restaurant_id: Option<String>,
}

impl OrderListQuery {
    pub fn into_filter(self) -> Result<OrderFilter, OrderError> {
        let status = self
            .status
            .filter(|status| !status.trim().is_empty())
            .map(|status| status.trim().parse::<OrderStatus>())
            .transpose()?;

        Ok(OrderFilter {
            status,
            restaurant_id: self.restaurant_id.filter(|id| !id.trim().is_empty()),
            user_id: None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub broker_connected: bool,
}

impl HealthResponse {
    pub fn ok(service: &str, broker_connected: bool) -> Self {
        Self {
            status: "ok".to_string(),
            service: service.to_string(),
            broker_connected,
        }
    }
}

fn default_quantity() -> u32 {
    1
}
