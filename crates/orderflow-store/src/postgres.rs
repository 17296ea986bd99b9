use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_core::{
    Insertion, Mutation, Order, OrderError, OrderFilter, OrderItem, OrderStore, OutboxEntry,
    OutboxStatus, OutboxStore,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "order_id, restaurant_id, user_id, items, total_amount, delivery_address, status, driver_id, created_at, accepted_at, prepared_at, picked_up_at, delivered_at, cancelled_at, updated_at";

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        order_id UUID PRIMARY KEY,
        restaurant_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        items JSONB NOT NULL DEFAULT '[]'::jsonb,
        total_amount NUMERIC(14, 2) NOT NULL,
        delivery_address TEXT NOT NULL,
        status TEXT NOT NULL,
        driver_id TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        accepted_at TIMESTAMPTZ,
        prepared_at TIMESTAMPTZ,
        picked_up_at TIMESTAMPTZ,
        delivered_at TIMESTAMPTZ,
        cancelled_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS outbox (
        entry_id UUID PRIMARY KEY,
        exchange TEXT NOT NULL,
        routing_key TEXT NOT NULL,
        event JSONB NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        published_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS outbox_pending_idx ON outbox (created_at) WHERE status = 'PENDING'",
];

/// Postgres-backed local store. A mutation and its outbox entry commit in the
/// same transaction, under a row lock on the order.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), OrderError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(OrderError::storage)?;
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(
        &self,
        order: Order,
        outbox: Option<OutboxEntry>,
    ) -> Result<Insertion, OrderError> {
        let mut tx = self.pool.begin().await.map_err(OrderError::storage)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, restaurant_id, user_id, items, total_amount, delivery_address, status,
                driver_id, created_at, accepted_at, prepared_at, picked_up_at, delivered_at,
                cancelled_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order.order_id)
        .bind(&order.restaurant_id)
        .bind(&order.user_id)
        .bind(Json(&order.items))
        .bind(order.total_amount)
        .bind(&order.delivery_address)
        .bind(order.status.as_str())
        .bind(&order.driver_id)
        .bind(order.created_at)
        .bind(order.accepted_at)
        .bind(order.prepared_at)
        .bind(order.picked_up_at)
        .bind(order.delivered_at)
        .bind(order.cancelled_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(OrderError::storage)?;

        if inserted.rows_affected() == 0 {
            let existing = select_order(&mut tx, order.order_id, false)
                .await?
                .ok_or_else(|| OrderError::not_found(order.order_id))?;
            tx.commit().await.map_err(OrderError::storage)?;
            return Ok(Insertion::Existing(existing));
        }

        if let Some(entry) = &outbox {
            insert_outbox(&mut tx, entry).await?;
        }
        tx.commit().await.map_err(OrderError::storage)?;

        Ok(Insertion::Created(order))
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, OrderError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(OrderError::storage)?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, OrderError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR restaurant_id = $2)
              AND ($3::text IS NULL OR user_id = $3)
            ORDER BY created_at DESC
            "#
        ))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.restaurant_id.as_deref())
        .bind(filter.user_id.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(OrderError::storage)?;

        rows.iter().map(order_from_row).collect()
    }

    async fn mutate(
        &self,
        order_id: Uuid,
        mutation: Mutation,
    ) -> Result<(Order, Option<OutboxEntry>), OrderError> {
        let mut tx = self.pool.begin().await.map_err(OrderError::storage)?;

        let mut order = select_order(&mut tx, order_id, true)
            .await?
            .ok_or_else(|| OrderError::not_found(order_id))?;

        // Dropping the transaction on error rolls back the row lock.
        let entry = mutation(&mut order)?;

        sqlx::query(
            r#"
            UPDATE orders SET
                status = $2,
                driver_id = $3,
                accepted_at = $4,
                prepared_at = $5,
                picked_up_at = $6,
                delivered_at = $7,
                cancelled_at = $8,
                updated_at = $9
            WHERE order_id = $1
            "#,
        )
        .bind(order.order_id)
        .bind(order.status.as_str())
        .bind(&order.driver_id)
        .bind(order.accepted_at)
        .bind(order.prepared_at)
        .bind(order.picked_up_at)
        .bind(order.delivered_at)
        .bind(order.cancelled_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(OrderError::storage)?;

        if let Some(entry) = &entry {
            insert_outbox(&mut tx, entry).await?;
        }
        tx.commit().await.map_err(OrderError::storage)?;

        Ok((order, entry))
    }
}

#[async_trait]
impl OutboxStore for PgOrderStore {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, OrderError> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, exchange, routing_key, event, status, attempts, last_error, created_at, published_at
            FROM outbox
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(OrderError::storage)?;

        rows.iter().map(outbox_from_row).collect()
    }

    async fn pending_for_order(&self, order_id: Uuid) -> Result<Vec<OutboxEntry>, OrderError> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, exchange, routing_key, event, status, attempts, last_error, created_at, published_at
            FROM outbox
            WHERE status = 'PENDING' AND event->>'orderId' = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(OrderError::storage)?;

        rows.iter().map(outbox_from_row).collect()
    }

    async fn mark_published(&self, entry_id: Uuid, at: DateTime<Utc>) -> Result<(), OrderError> {
        sqlx::query(
            "UPDATE outbox SET status = 'PUBLISHED', attempts = attempts + 1, published_at = $2, last_error = NULL WHERE entry_id = $1",
        )
        .bind(entry_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(OrderError::storage)?;
        Ok(())
    }

    async fn record_failure(&self, entry_id: Uuid, error: &str) -> Result<(), OrderError> {
        sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = $2 WHERE entry_id = $1")
            .bind(entry_id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(OrderError::storage)?;
        Ok(())
    }
}

async fn select_order(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    for_update: bool,
) -> Result<Option<Order>, OrderError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1{lock}"
    ))
    .bind(order_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(OrderError::storage)?;

    row.as_ref().map(order_from_row).transpose()
}

async fn insert_outbox(
    tx: &mut Transaction<'_, Postgres>,
    entry: &OutboxEntry,
) -> Result<(), OrderError> {
    sqlx::query(
        r#"
        INSERT INTO outbox (
            entry_id, exchange, routing_key, event, status, attempts, last_error, created_at, published_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(entry.entry_id)
    .bind(&entry.exchange)
    .bind(&entry.routing_key)
    .bind(Json(&entry.event))
    .bind(entry.status.as_str())
    .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
    .bind(&entry.last_error)
    .bind(entry.created_at)
    .bind(entry.published_at)
    .execute(&mut **tx)
    .await
    .map_err(OrderError::storage)?;
    Ok(())
}

fn order_from_row(row: &PgRow) -> Result<Order, OrderError> {
    let status: String = row.try_get("status").map_err(OrderError::storage)?;
    let items: Json<Vec<OrderItem>> = row.try_get("items").map_err(OrderError::storage)?;

    Ok(Order {
        order_id: row.try_get("order_id").map_err(OrderError::storage)?,
        restaurant_id: row.try_get("restaurant_id").map_err(OrderError::storage)?,
        user_id: row.try_get("user_id").map_err(OrderError::storage)?,
        items: items.0,
        total_amount: row.try_get("total_amount").map_err(OrderError::storage)?,
        delivery_address: row.try_get("delivery_address").map_err(OrderError::storage)?,
        status: status.parse()?,
        driver_id: row.try_get("driver_id").map_err(OrderError::storage)?,
        created_at: row.try_get("created_at").map_err(OrderError::storage)?,
        accepted_at: row.try_get("accepted_at").map_err(OrderError::storage)?,
        prepared_at: row.try_get("prepared_at").map_err(OrderError::storage)?,
        picked_up_at: row.try_get("picked_up_at").map_err(OrderError::storage)?,
        delivered_at: row.try_get("delivered_at").map_err(OrderError::storage)?,
        cancelled_at: row.try_get("cancelled_at").map_err(OrderError::storage)?,
        updated_at: row.try_get("updated_at").map_err(OrderError::storage)?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxEntry, OrderError> {
    let status: String = row.try_get("status").map_err(OrderError::storage)?;
    let status = match status.as_str() {
        "PUBLISHED" => OutboxStatus::Published,
        _ => OutboxStatus::Pending,
    };
    let event: Json<orderflow_core::OrderEvent> =
        row.try_get("event").map_err(OrderError::storage)?;
    let attempts: i32 = row.try_get("attempts").map_err(OrderError::storage)?;

    Ok(OutboxEntry {
        entry_id: row.try_get("entry_id").map_err(OrderError::storage)?,
        exchange: row.try_get("exchange").map_err(OrderError::storage)?,
        routing_key: row.try_get("routing_key").map_err(OrderError::storage)?,
        event: event.0,
        status,
        attempts: u32::try_from(attempts).unwrap_or_default(),
        last_error: row.try_get("last_error").map_err(OrderError::storage)?,
        created_at: row.try_get("created_at").map_err(OrderError::storage)?,
        published_at: row.try_get("published_at").map_err(OrderError::storage)?,
    })
}
