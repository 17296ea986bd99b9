use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{Router, http::StatusCode};
use orderflow_bus::{Broker, Channel, DedupCache};
use orderflow_core::OrderRepository;
use orderflow_services::ServiceError;
use tracing::{error, info};

use crate::config::ServiceConfig;
use crate::contracts::HealthResponse;
use crate::db::open_order_store;
use crate::redis_bus::RedisBroker;

pub fn init_tracing(crate_target: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            format!("{crate_target}=info,orderflow_services=info,orderflow_bus=info")
        }))
        .init();
}

/// Config, local store and broker channel shared by every service binary.
pub struct ServiceContext {
    pub config: ServiceConfig,
    pub store: Arc<dyn OrderRepository>,
    pub channel: Channel,
}

impl ServiceContext {
    pub async fn connect(service_name: &str, default_http_addr: &str) -> Result<Self> {
        let config = ServiceConfig::from_env(service_name, default_http_addr)?;
        let store = open_order_store(&config).await?;
        let broker: Arc<dyn Broker> =
            Arc::new(RedisBroker::connect(&config.redis_url, &config.consumer_name).await?);

        Ok(Self {
            config,
            store,
            channel: Channel::open(broker),
        })
    }

    pub fn dedup(&self) -> DedupCache {
        DedupCache::new(self.config.dedup_capacity, self.config.dedup_ttl)
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse::ok(&self.config.service_name, self.channel.is_connected().await)
    }

    pub async fn serve(&self, router: Router) -> Result<()> {
        let addr: SocketAddr = self.config.http_addr.parse()?;
        info!("{} listening on {}", self.config.service_name, addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }
}

pub fn error_response(err: ServiceError) -> (StatusCode, String) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    (status, err.to_string())
}
