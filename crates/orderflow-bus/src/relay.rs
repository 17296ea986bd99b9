use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orderflow_core::{OrderRepository, OutboxEntry};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::publisher::Publisher;

const FLUSH_BATCH: usize = 100;

/// Moves committed outbox entries onto the broker.
#[derive(Clone)]
pub struct OutboxRelay {
    store: Arc<dyn OrderRepository>,
    publisher: Publisher,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn OrderRepository>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Publishes one entry. A failed publish leaves the entry pending with
    /// the error recorded.
    pub async fn dispatch(&self, entry: &OutboxEntry) -> Result<(), BrokerError> {
        match self
            .publisher
            .publish(&entry.exchange, &entry.routing_key, &entry.event)
            .await
        {
            Ok(()) => {
                if let Err(err) = self.store.mark_published(entry.entry_id, Utc::now()).await {
                    // The relay will publish it again; consumers drop the repeat.
                    warn!(entry_id = %entry.entry_id, error = %err, "published entry not marked");
                }
                Ok(())
            }
            Err(err) => {
                error!(
                    entry_id = %entry.entry_id,
                    message_id = %entry.event.message_id,
                    exchange = %entry.exchange,
                    error = %err,
                    "outbox publish failed"
                );
                if let Err(store_err) = self
                    .store
                    .record_failure(entry.entry_id, &err.to_string())
                    .await
                {
                    warn!(entry_id = %entry.entry_id, error = %store_err, "failed to record publish failure");
                }
                Err(err)
            }
        }
    }

    /// Publishes one order's pending entries oldest first, stopping at the
    /// first failure.
    pub async fn publish_order(&self, order_id: Uuid) -> Result<usize, BrokerError> {
        let pending = self
            .store
            .pending_for_order(order_id)
            .await
            .map_err(|err| BrokerError::Unavailable(format!("outbox read failed: {err}")))?;

        for entry in &pending {
            self.dispatch(entry).await?;
        }
        Ok(pending.len())
    }

    /// Publishes pending entries oldest first and returns how many went out.
    ///
    /// An entry that fails is skipped along with every later entry of the
    /// same order. The batch ends early only when the broker is unreachable.
    pub async fn flush(&self) -> Result<usize, BrokerError> {
        let pending = match self.store.pending(FLUSH_BATCH).await {
            Ok(pending) => pending,
            Err(err) => {
                error!(error = %err, "failed to read outbox");
                return Ok(0);
            }
        };

        let mut published = 0;
        let mut held: HashSet<Uuid> = HashSet::new();
        for entry in &pending {
            let order_id = entry.event.order_id;
            if held.contains(&order_id) {
                continue;
            }
            match self.dispatch(entry).await {
                Ok(()) => published += 1,
                Err(err @ BrokerError::Unavailable(_)) => return Err(err),
                Err(_) => {
                    held.insert(order_id);
                }
            }
        }

        if published > 0 {
            info!(published, "outbox flushed");
        }
        if !held.is_empty() {
            warn!(held = held.len(), "outbox entries held back after publish failures");
        }
        Ok(published)
    }

    pub async fn run(self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(poll_ms = poll_interval.as_millis() as u64, "outbox relay started");

        loop {
            ticker.tick().await;
            if let Err(err) = self.flush().await {
                debug!(error = %err, "outbox relay will retry");
            }
        }
    }
}
