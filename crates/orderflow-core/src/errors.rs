use thiserror::Error;
use uuid::Uuid;

use crate::models::OrderStatus;

/// Local, synchronous failures of a transition call. None of these ever
/// produce an event.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrderError {
    #[error("order {order_id} not found")]
    NotFound { order_id: Uuid },
    #[error("{0}")]
    UnknownReference(String),
    #[error("{message}")]
    Conflict {
        message: String,
        current: OrderStatus,
    },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl OrderError {
    pub fn not_found(order_id: Uuid) -> Self {
        Self::NotFound { order_id }
    }

    pub fn conflict(message: impl Into<String>, current: OrderStatus) -> Self {
        Self::Conflict {
            message: message.into(),
            current,
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}
