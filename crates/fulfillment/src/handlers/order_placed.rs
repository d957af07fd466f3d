use std::sync::Arc;

use async_trait::async_trait;
use cache::CacheInvalidationService;
use common::ProductId;
use domain::OrderPlacedEvent;
use messaging::{EventHandler, HandlerOutcome};

use crate::services::{InventoryService, Notification, NotificationService};

/// Deducts stock for every line of a placed order, then confirms the order
/// to the customer.
///
/// A failed deduction stops the handler before the confirmation is sent.
/// Redelivery is safe because deductions are once per order line.
pub struct OrderPlacedEventHandler {
    inventory: Arc<dyn InventoryService>,
    notifications: Arc<dyn NotificationService>,
    invalidation: Option<CacheInvalidationService>,
}

impl OrderPlacedEventHandler {
    pub fn new(
        inventory: Arc<dyn InventoryService>,
        notifications: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
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
impl EventHandler<OrderPlacedEvent> for OrderPlacedEventHandler {
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id()))]
    async fn handle(&self, event: OrderPlacedEvent) -> HandlerOutcome {
        let order_id = event.order_id();

        let items_total = event.items_total();
        if items_total != event.total_amount() {
            tracing::warn!(
                total_amount = %event.total_amount(),
                %items_total,
                "Order total does not match its items"
            );
        }

        for item in event.items() {
            if let Err(error) = self
                .inventory
                .deduct(order_id, &item.product_id, item.quantity)
                .await
            {
                tracing::warn!(product_id = %item.product_id, %error, "Inventory deduction failed");
                return error.into();
            }
        }

        let product_ids: Vec<ProductId> = event
            .items()
            .iter()
            .map(|item| item.product_id.clone())
            .collect();
        super::invalidate_stock(self.invalidation.as_ref(), order_id, &product_ids).await;

        let confirmation = Notification::OrderConfirmation {
            order_id,
            customer_id: event.customer_id(),
            total: event.total_amount(),
        };
        if let Err(error) = self.notifications.send(confirmation).await {
            tracing::warn!(%error, "Order confirmation failed");
            return error.into();
        }

        metrics::counter!("orders_placed_handled_total").increment(1);
        tracing::info!("Inventory deducted and confirmation sent");
        HandlerOutcome::Completed
    }
}
