use std::sync::Arc;

use anyhow::Result;
use orderflow_core::OrderRepository;
use orderflow_store::{InMemoryOrderStore, PgOrderStore};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::config::ServiceConfig;

pub async fn connect_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Postgres when `DATABASE_URL` is set, otherwise a process-local store.
pub async fn open_order_store(config: &ServiceConfig) -> Result<Arc<dyn OrderRepository>> {
    match &config.database_url {
        Some(database_url) => {
            let store = PgOrderStore::new(connect_database(database_url).await?);
            store.ensure_schema().await?;
            info!(service = %config.service_name, "using postgres order store");
            Ok(Arc::new(store))
        }
        None => {
            info!(service = %config.service_name, "using in-memory order store");
            Ok(Arc::new(InMemoryOrderStore::new()))
        }
    }
}
