pub mod catalog;
pub mod errors;
pub mod events;
pub mod machine;
pub mod models;
pub mod outbox;
pub mod storage;
pub mod transitions;

pub use catalog::{Catalog, Customer, MenuItem, OrderLine, OrderRequest, Restaurant};
pub use errors::OrderError;
pub use events::{EventType, MessageId, OrderEvent};
pub use machine::{OrderStateMachine, OwnerRole};
pub use models::{NewOrder, Order, OrderFilter, OrderItem, OrderStatus};
pub use outbox::{OutboxEntry, OutboxStatus};
pub use storage::{Insertion, Mutation, OrderRepository, OrderStore, OutboxStore};
pub use transitions::Transition;
