use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_DEDUP_CAPACITY: usize = 10_000;
const DEFAULT_DEDUP_TTL_SECS: u64 = 3600;
const DEFAULT_OUTBOX_POLL_MS: u64 = 1000;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub service_name: String,
    pub redis_url: String,
    pub http_addr: String,
    /// Without a database the service keeps its orders in memory.
    pub database_url: Option<String>,
    /// Menu catalog JSON; the bundled seed when unset.
    pub catalog_path: Option<String>,
    pub consumer_name: String,
    pub dedup_capacity: usize,
    pub dedup_ttl: Duration,
    pub outbox_poll: Duration,
}

impl ServiceConfig {
    pub fn from_env(service_name: &str, default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(service_name, default_http_addr, |key| {
            std::env::var(key).ok()
        })
    }

    pub fn from_lookup(
        service_name: &str,
        default_http_addr: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let redis_url = lookup("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr = lookup("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string());
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let catalog_path = lookup("CATALOG_PATH").filter(|path| !path.trim().is_empty());
        let consumer_name = lookup("CONSUMER_NAME").unwrap_or_else(|| service_name.to_string());
        let dedup_capacity = parse_or(&lookup, "DEDUP_CAPACITY", DEFAULT_DEDUP_CAPACITY)?;
        let dedup_ttl_secs = parse_or(&lookup, "DEDUP_TTL_SECS", DEFAULT_DEDUP_TTL_SECS)?;
        let outbox_poll_ms = parse_or(&lookup, "OUTBOX_POLL_MS", DEFAULT_OUTBOX_POLL_MS)?;

        Ok(Self {
            service_name: service_name.to_string(),
            redis_url,
            http_addr,
            database_url,
            catalog_path,
            consumer_name,
            dedup_capacity,
            dedup_ttl: Duration::from_secs(dedup_ttl_secs),
            outbox_poll: Duration::from_millis(outbox_poll_ms.max(1)),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
        None => Ok(default),
    }
}
