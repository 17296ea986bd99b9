pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use bootstrap::{ServiceContext, error_response, init_tracing};
pub use catalog::{load_catalog, parse_catalog};
pub use config::ServiceConfig;
pub use contracts::{
    CreateOrderRequest, DriverRequest, HealthResponse, OrderItemRequest, OrderListQuery,
};
pub use db::{connect_database, open_order_store};
pub use redis_bus::RedisBroker;
