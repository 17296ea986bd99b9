use orderflow_bus::BrokerError;
use orderflow_core::OrderError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error("event broker unavailable: {0}")]
    BrokerUnavailable(#[from] BrokerError),
}

impl ServiceError {
    /// HTTP status the error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Order(OrderError::NotFound { .. } | OrderError::UnknownReference(_)) => {
                404
            }
            ServiceError::Order(OrderError::Conflict { .. } | OrderError::Validation(_)) => 400,
            ServiceError::Order(OrderError::Unauthorized(_)) => 403,
            ServiceError::Order(OrderError::Storage(_)) | ServiceError::BrokerUnavailable(_) => {
                500
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use orderflow_core::OrderStatus;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn maps_local_failures_to_client_errors() {
        assert_eq!(
            ServiceError::from(OrderError::not_found(Uuid::new_v4())).status_code(),
            404
        );
        assert_eq!(
            ServiceError::from(OrderError::UnknownReference("User not found".to_string()))
                .status_code(),
            404
        );
        assert_eq!(
            ServiceError::from(OrderError::conflict("no", OrderStatus::Accepted)).status_code(),
            400
        );
        assert_eq!(
            ServiceError::from(OrderError::Unauthorized("not yours".to_string())).status_code(),
            403
        );
        assert_eq!(
            ServiceError::from(BrokerError::Unavailable("down".to_string())).status_code(),
            500
        );
    }
}
