//! Customer notification service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CustomerId, Money, OrderId};
use domain::OrderStatus;

use crate::error::ServiceError;

/// A notification sent to a customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    OrderConfirmation {
        order_id: OrderId,
        customer_id: CustomerId,
        total: Money,
    },
    StatusChanged {
        order_id: OrderId,
        customer_id: CustomerId,
        previous: OrderStatus,
        new: OrderStatus,
    },
    Cancellation {
        order_id: OrderId,
        customer_id: CustomerId,
        reason: String,
    },
    ShipmentConfirmation {
        order_id: OrderId,
        customer_id: CustomerId,
        tracking_number: String,
    },
}

impl Notification {
    pub fn order_id(&self) -> OrderId {
        match self {
            Self::OrderConfirmation { order_id, .. }
            | Self::StatusChanged { order_id, .. }
            | Self::Cancellation { order_id, .. }
            | Self::ShipmentConfirmation { order_id, .. } => *order_id,
        }
    }
}

/// Sends customer-facing messages.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<Notification>,
    fail_on_send: bool,
}

/// In-memory notification service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationService {
    /// Creates a new in-memory notification service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every send.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.write().unwrap().fail_on_send = fail;
    }

    /// Notifications sent so far, in order.
    pub fn sent(&self) -> Vec<Notification> {
        self.state.read().unwrap().sent.clone()
    }

    /// Notifications sent for one order.
    pub fn sent_for(&self, order_id: OrderId) -> Vec<Notification> {
        self.state
            .read()
            .unwrap()
            .sent
            .iter()
            .filter(|n| n.order_id() == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn send(&self, notification: Notification) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_send {
            return Err(ServiceError::unavailable("notification", "mail relay down"));
        }

        state.sent.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_filter_by_order() {
        let service = InMemoryNotificationService::new();
        let order_id = OrderId::new();
        let customer_id = CustomerId::new();

        service
            .send(Notification::OrderConfirmation {
                order_id,
                customer_id,
                total: Money::from_units(250),
            })
            .await
            .unwrap();
        service
            .send(Notification::Cancellation {
                order_id: OrderId::new(),
                customer_id,
                reason: "changed mind".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(service.sent().len(), 2);
        assert_eq!(service.sent_for(order_id).len(), 1);
    }

    #[tokio::test]
    async fn test_fail_on_send() {
        let service = InMemoryNotificationService::new();
        service.set_fail_on_send(true);

        let result = service
            .send(Notification::Cancellation {
                order_id: OrderId::new(),
                customer_id: CustomerId::new(),
                reason: "x".to_string(),
            })
            .await;

        assert!(result.is_err());
        assert!(service.sent().is_empty());
    }
}
