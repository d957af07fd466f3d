use std::sync::Arc;

use async_trait::async_trait;
use cache::CacheInvalidationService;
use common::ProductId;
use domain::OrderCancelledEvent;
use messaging::{EventHandler, HandlerOutcome};

use crate::repository::OrderRepository;
use crate::services::{InventoryService, Notification, NotificationService};

/// Puts a cancelled order's stock back and tells the customer why the order
/// was cancelled.
pub struct OrderCancelledEventHandler {
    orders: Arc<dyn OrderRepository>,
    inventory: Arc<dyn InventoryService>,
    notifications: Arc<dyn NotificationService>,
    invalidation: Option<CacheInvalidationService>,
}

impl OrderCancelledEventHandler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        inventory: Arc<dyn InventoryService>,
        notifications: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            orders,
            inventory,
            notifications,
            invalidation: None,
        }
    }

    pub fn with_cache_invalidation(mut self, invalidation: CacheInvalidationService) -> Self {
        self.invalidation = Some(invalidation);
        self
    }
}

#[async_trait]
impl EventHandler<OrderCancelledEvent> for OrderCancelledEventHandler {
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id()))]
    async fn handle(&self, event: OrderCancelledEvent) -> HandlerOutcome {
        let order_id = event.order_id();

        let order = match self.orders.get(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                tracing::error!("Cancelled order not found");
                return HandlerOutcome::fatal(format!("Order not found: {order_id}"));
            }
            Err(error) => {
                tracing::warn!(%error, "Loading cancelled order failed");
                return error.into();
            }
        };

        for item in order.items() {
            if let Err(error) = self
                .inventory
                .return_stock(order_id, &item.product_id, item.quantity)
                .await
            {
                tracing::warn!(product_id = %item.product_id, %error, "Inventory return failed");
                return error.into();
            }
        }

        let product_ids: Vec<ProductId> = order
            .items()
            .iter()
            .map(|item| item.product_id.clone())
            .collect();
        super::invalidate_stock(self.invalidation.as_ref(), order_id, &product_ids).await;

        let notification = Notification::Cancellation {
            order_id,
            customer_id: event.customer_id(),
            reason: event.reason().to_string(),
        };
        if let Err(error) = self.notifications.send(notification).await {
            tracing::warn!(%error, "Cancellation notification failed");
            return error.into();
        }

        metrics::counter!("orders_cancelled_handled_total").increment(1);
        tracing::info!(reason = event.reason(), "Inventory returned and cancellation sent");
        HandlerOutcome::Completed
    }
}
