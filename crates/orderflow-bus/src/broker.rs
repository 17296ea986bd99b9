use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Topic => "topic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    pub fn topic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ExchangeKind::Topic,
            durable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
}

impl QueueSpec {
    pub fn durable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            durable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub pattern: String,
}

impl Binding {
    pub fn new(queue: &str, exchange: &str, pattern: &str) -> Self {
        Self {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message_id: String,
    pub persistent: bool,
    pub body: Vec<u8>,
}

/// Identifies one delivery on one queue for ack/nack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag {
    pub queue: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub message_id: Option<String>,
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

/// A message broker with durable topic exchanges, durable queues and manual
/// acknowledgement.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// No-op when an identical exchange exists; `PreconditionFailed` when the
    /// existing one differs.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError>;
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError>;
    async fn bind_queue(&self, binding: &Binding) -> Result<(), BrokerError>;
    /// Resolves once the message is durably enqueued on every matching queue.
    async fn publish(&self, message: OutgoingMessage) -> Result<(), BrokerError>;
    /// Messages stay enqueued until acked.
    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError>;
    async fn ack(&self, tag: &DeliveryTag) -> Result<(), BrokerError>;
    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<(), BrokerError>;
    async fn is_connected(&self) -> bool;
}
