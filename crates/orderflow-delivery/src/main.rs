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
    DriverRequest, HealthResponse, OrderListQuery, ServiceContext, error_response, init_tracing,
};
use orderflow_services::DeliveryService;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    service: DeliveryService,
    context: Arc<ServiceContext>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    init_tracing("orderflow_delivery");

    let context = Arc::new(ServiceContext::connect("delivery-service", "0.0.0.0:3003").await?);
    let service = DeliveryService::new(context.store.clone(), context.channel.clone());
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
        .route("/orders/prepared", get(prepared_orders))
        .route("/orders/{order_id}", get(get_order))
        .route("/orders/{order_id}/pickup", put(pickup_order))
        .route("/orders/{order_id}/deliver", put(deliver_order))
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

async fn prepared_orders(
    State(state): State<AppState>,
) -> Result<Json<Vec<Order>>, (StatusCode, String)> {
    state
        .service
        .prepared_orders()
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

async fn pickup_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Order>, (StatusCode, String)> {
    state
        .service
        .pickup_order(order_id, &payload.driver_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn deliver_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Order>, (StatusCode, String)> {
    state
        .service
        .deliver_order(order_id, &payload.driver_id)
        .await
        .map(Json)
        .map_err(error_response)
}
