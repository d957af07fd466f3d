//! Write-triggered cache invalidation.

use common::{CategoryId, CustomerId, OrderId, ProductId};

use crate::error::Result;
use crate::keys;
use crate::service::CacheService;

/// Clears the cache entries a write makes stale.
#[derive(Clone)]
pub struct CacheInvalidationService {
    cache: CacheService,
}

impl CacheInvalidationService {
    pub fn new(cache: CacheService) -> Self {
        Self { cache }
    }

    /// A product changed: drop it and every product listing.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_product(&self, product_id: &ProductId) -> Result<()> {
        self.cache.remove(&keys::product(product_id)).await?;
        self.cache.remove_by_prefix(keys::PRODUCTS_PREFIX).await?;
        Ok(())
    }

    /// Stock changed on several products at once; listings are cleared once.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_products(&self, product_ids: &[ProductId]) -> Result<()> {
        for product_id in product_ids {
            self.cache.remove(&keys::product(product_id)).await?;
        }
        self.cache.remove_by_prefix(keys::PRODUCTS_PREFIX).await?;
        Ok(())
    }

    /// A category changed: drop the category list and that category's
    /// product listings.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_category(&self, category_id: CategoryId) -> Result<()> {
        self.cache.remove(keys::CATEGORIES_LIST).await?;
        self.cache
            .remove_by_prefix(&keys::category_products_prefix(category_id))
            .await?;
        Ok(())
    }

    /// An order changed: drop it and its customer's order listings.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_order(&self, order_id: OrderId, customer_id: CustomerId) -> Result<()> {
        self.cache.remove(&keys::order(order_id)).await?;
        self.cache
            .remove_by_prefix(&keys::customer_orders_prefix(customer_id))
            .await?;
        Ok(())
    }
}
