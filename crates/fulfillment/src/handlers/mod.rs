//! Consumers of the order lifecycle events.

mod order_cancelled;
mod order_placed;
mod order_status_changed;

pub use order_cancelled::OrderCancelledEventHandler;
pub use order_placed::OrderPlacedEventHandler;
pub use order_status_changed::OrderStatusChangedEventHandler;

use cache::CacheInvalidationService;
use common::{OrderId, ProductId};

/// Stock moved for these products; cached reads of them are stale.
async fn invalidate_stock(
    invalidation: Option<&CacheInvalidationService>,
    order_id: OrderId,
    product_ids: &[ProductId],
) {
    let Some(invalidation) = invalidation else {
        return;
    };
    if let Err(error) = invalidation.invalidate_products(product_ids).await {
        tracing::warn!(%order_id, %error, "Cache invalidation after stock change failed");
    }
}
