use std::sync::Arc;

use async_trait::async_trait;
use domain::OrderStatusChangedEvent;
use messaging::{EventHandler, HandlerOutcome};

use crate::services::{Notification, NotificationService};

/// Tells the customer their order moved to a new status.
pub struct OrderStatusChangedEventHandler {
    notifications: Arc<dyn NotificationService>,
}

impl OrderStatusChangedEventHandler {
    pub fn new(notifications: Arc<dyn NotificationService>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl EventHandler<OrderStatusChangedEvent> for OrderStatusChangedEventHandler {
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id()))]
    async fn handle(&self, event: OrderStatusChangedEvent) -> HandlerOutcome {
        let notification = Notification::StatusChanged {
            order_id: event.order_id(),
            customer_id: event.customer_id(),
            previous: event.previous_status(),
            new: event.new_status(),
        };

        match self.notifications.send(notification).await {
            Ok(()) => {
                tracing::info!(
                    previous = %event.previous_status(),
                    new = %event.new_status(),
                    "Status change notification sent"
                );
                HandlerOutcome::Completed
            }
            Err(error) => {
                tracing::warn!(%error, "Status change notification failed");
                error.into()
            }
        }
    }
}
