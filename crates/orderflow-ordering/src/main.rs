use std::sync::Arc;

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
};
use orderflow_core::{MenuItem, Order, Restaurant};
use orderflow_platform::{
    CreateOrderRequest, HealthResponse, OrderListQuery, ServiceContext, error_response,
    init_tracing, load_catalog,
};
use orderflow_services::OrderingService;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    service: OrderingService,
    context: Arc<ServiceContext>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    init_tracing("orderflow_ordering");

    let context = Arc::new(ServiceContext::connect("order-service", "0.0.0.0:3001").await?);
    let catalog = Arc::new(load_catalog(&context.config)?);
    let service = OrderingService::new(context.store.clone(), context.channel.clone(), catalog);
    let _runtime = service
        .start(&context.channel, context.dedup(), context.config.outbox_poll)
        .await?;

    let state = AppState {
        service,
        context: context.clone(),
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/{order_id}", get(get_order))
        .route("/orders/{order_id}/cancel", put(cancel_order))
        .route("/users/{user_id}/orders", get(user_orders))
        .route("/menu-item/restaurants", get(list_restaurants))
        .route("/menu-item/restaurants/{restaurant_id}", get(get_restaurant))
        .route("/menu-item/restaurants/{restaurant_id}/menu", get(restaurant_menu))
        .with_state(state);

    context.serve(router).await
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.context.health().await)
}

async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), (StatusCode, String)> {
    let order = state
        .service
        .place_order(&payload.into_order_request())
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Vec<Order>>, (StatusCode, String)> {
    let filter = query
        .into_filter()
        .map_err(|err| error_response(err.into()))?;
    state
        .service
        .list_orders(&filter)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, (StatusCode, String)> {
    state
        .service
        .get_order(order_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, (StatusCode, String)> {
    state
        .service
        .cancel_order(order_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Order>>, (StatusCode, String)> {
    state
        .service
        .orders_for_user(&user_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn list_restaurants(State(state): State<AppState>) -> Json<Vec<Restaurant>> {
    Json(state.service.restaurants().to_vec())
}

async fn get_restaurant(
    State(state): State<AppState>,
    Path(restaurant_id): Path<String>,
) -> Result<Json<Restaurant>, (StatusCode, String)> {
    state
        .service
        .restaurant(&restaurant_id)
        .map(|restaurant| Json(restaurant.clone()))
        .map_err(error_response)
}

async fn restaurant_menu(
    State(state): State<AppState>,
    Path(restaurant_id): Path<String>,
) -> Result<Json<Vec<MenuItem>>, (StatusCode, String)> {
    state
        .service
        .menu(&restaurant_id)
        .map(|menu| Json(menu.to_vec()))
        .map_err(error_response)
}
