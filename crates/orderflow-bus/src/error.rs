use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("broker rejected message {0}")]
    Nacked(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl BrokerError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Failure raised by a domain handler while processing a delivery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl HandlerError {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}
