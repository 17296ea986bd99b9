use std::sync::Arc;

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
};
use orderflow_core::Order;
use orderflow_platform::{
    HealthResponse, OrderListQuery, ServiceContext, error_response, init_tracing,
};
use orderflow_services::RestaurantService;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    service: RestaurantService,
    context: Arc<ServiceContext>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    init_tracing("orderflow_restaurant");

    let context = Arc::new(ServiceContext::connect("restaurant-service", "0.0.0.0:3002").await?);
    let service = RestaurantService::new(context.store.clone(), context.channel.clone());
    let _runtime = service
        .start(&context.channel, context.dedup(), context.config.outbox_poll)
        .await?;

    let state = AppState {
        service,
        context: context.clone(),
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/orders", get(list_orders))
        .route(
            "/restaurants/{restaurant_id}/orders/pending",
            get(pending_orders),
        )
        .route("/orders/{order_id}", get(get_order))
        .route("/orders/{order_id}/accept", put(accept_order))
        .route("/orders/{order_id}/prepare", put(prepare_order))
        .with_state(state);

    context.serve(router).await
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.context.health().await)
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

async fn pending_orders(
    State(state): State<AppState>,
    Path(restaurant_id): Path<String>,
) -> Result<Json<Vec<Order>>, (StatusCode, String)> {
    state
        .service
        .pending_orders(&restaurant_id)
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

async fn accept_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, (StatusCode, String)> {
    state
        .service
        .accept_order(order_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn prepare_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, (StatusCode, String)> {
    state
        .service
        .prepare_order(order_id)
        .await
        .map(Json)
        .map_err(error_response)
}
