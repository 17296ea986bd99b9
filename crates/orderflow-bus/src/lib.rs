pub mod broker;
pub mod channel;
pub mod consumer;
pub mod dedup;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod relay;
pub mod topic;
pub mod topology;

pub use broker::{
    Binding, Broker, Delivery, DeliveryTag, ExchangeKind, ExchangeSpec, OutgoingMessage,
    QueueSpec,
};
pub use channel::Channel;
pub use consumer::{Consumer, EventHandler, FailurePolicy, Outcome};
pub use dedup::DedupCache;
pub use error::{BrokerError, HandlerError};
pub use memory::MemoryBroker;
pub use publisher::{PublishMode, Publisher};
pub use relay::OutboxRelay;
pub use topic::topic_matches;
pub use topology::{
    DELIVERY_EXCHANGE, DELIVERY_ORDERS_QUEUE, ORDER_STATUS_QUEUE, ORDERS_EXCHANGE,
    RESTAURANT_EXCHANGE, RESTAURANT_ORDERS_QUEUE, Topology, TopologyManager,
};
