//! Fulfillment error types.

use common::{OrderId, ProductId};
use domain::OrderError;
use jobs::JobId;
use messaging::{HandlerOutcome, MessagingError};
use thiserror::Error;

/// Errors raised by the external services the handlers and jobs call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Not enough stock to cover a deduction.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The service could not be reached or refused the call.
    #[error("{service} service unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },

    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),
}

impl ServiceError {
    pub fn unavailable(service: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            reason: reason.into(),
        }
    }

    /// Whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<ServiceError> for HandlerOutcome {
    fn from(error: ServiceError) -> Self {
        if error.is_retryable() {
            HandlerOutcome::retryable(error.to_string())
        } else {
            HandlerOutcome::fatal(error.to_string())
        }
    }
}

/// Errors returned by [`crate::OrderCommandService`].
#[derive(Debug, Error)]
pub enum OrderServiceError {
    /// The order rejected the change.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order repository failed.
    #[error("Repository error: {0}")]
    Repository(#[source] ServiceError),

    /// The change was saved but its event could not be published.
    #[error("Order {order_id} saved but event publish failed: {source}")]
    Publish {
        order_id: OrderId,
        #[source]
        source: MessagingError,
    },

    /// The scheduler refused a continuation of the post-order chain.
    #[error("Post-order job chain rejected continuation of job {0}")]
    JobChain(JobId),
}

/// Convenience type alias for order command results.
pub type Result<T> = std::result::Result<T, OrderServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mapping() {
        let unavailable = ServiceError::unavailable("inventory", "timeout");
        assert!(matches!(
            HandlerOutcome::from(unavailable),
            HandlerOutcome::Retryable(_)
        ));

        let insufficient = ServiceError::InsufficientStock {
            product_id: ProductId::new("p1"),
            requested: 5,
            available: 2,
        };
        assert!(matches!(
            HandlerOutcome::from(insufficient),
            HandlerOutcome::Fatal(_)
        ));

        assert!(!ServiceError::OrderNotFound(OrderId::new()).is_retryable());
    }
}
