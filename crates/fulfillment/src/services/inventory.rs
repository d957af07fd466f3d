//! Inventory service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{OrderId, ProductId};

use crate::error::ServiceError;

/// Stock adjustments driven by order events.
///
/// Both operations are keyed by (order, product) so a redelivered event
/// cannot move stock twice.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Deducts `quantity` of `product_id` for `order_id`. Deducting again for
    /// the same order and product is a no-op, as is deducting for a line
    /// whose return was already requested.
    async fn deduct(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), ServiceError>;

    /// Returns stock deducted for `order_id`. A repeated return is a no-op.
    ///
    /// A return that arrives before its deduction moves no stock but voids
    /// the line, so the late deduction is skipped.
    async fn return_stock(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), ServiceError>;

    /// Units currently on hand.
    async fn available(&self, product_id: &ProductId) -> Result<u32, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<ProductId, u32>,
    deductions: HashMap<(OrderId, ProductId), u32>,
    returned: HashSet<(OrderId, ProductId)>,
    voided: HashSet<(OrderId, ProductId)>,
    deduct_calls: Vec<(OrderId, ProductId, u32)>,
    fail_on_deduct: bool,
    fail_on_return: bool,
}

/// In-memory inventory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service with no stock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stock level for a product.
    pub fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        self.state
            .write()
            .unwrap()
            .stock
            .insert(product_id.into(), quantity);
    }

    /// Configures deductions to fail as if the service were unreachable.
    pub fn set_fail_on_deduct(&self, fail: bool) {
        self.state.write().unwrap().fail_on_deduct = fail;
    }

    /// Configures returns to fail as if the service were unreachable.
    pub fn set_fail_on_return(&self, fail: bool) {
        self.state.write().unwrap().fail_on_return = fail;
    }

    /// Units on hand for a product.
    pub fn stock(&self, product_id: &ProductId) -> u32 {
        self.state
            .read()
            .unwrap()
            .stock
            .get(product_id)
            .copied()
            .unwrap_or(0)
    }

    /// Every deduct call received, applied or not.
    pub fn deduct_calls(&self) -> Vec<(OrderId, ProductId, u32)> {
        self.state.read().unwrap().deduct_calls.clone()
    }

    /// Quantity deducted for one order line, if any.
    pub fn deducted(&self, order_id: OrderId, product_id: &ProductId) -> Option<u32> {
        self.state
            .read()
            .unwrap()
            .deductions
            .get(&(order_id, product_id.clone()))
            .copied()
    }

    /// Whether stock for one order line has been returned.
    pub fn is_returned(&self, order_id: OrderId, product_id: &ProductId) -> bool {
        self.state
            .read()
            .unwrap()
            .returned
            .contains(&(order_id, product_id.clone()))
    }

    /// Whether a return reached this order line before any deduction.
    pub fn is_voided(&self, order_id: OrderId, product_id: &ProductId) -> bool {
        self.state
            .read()
            .unwrap()
            .voided
            .contains(&(order_id, product_id.clone()))
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn deduct(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        state
            .deduct_calls
            .push((order_id, product_id.clone(), quantity));

        if state.fail_on_deduct {
            return Err(ServiceError::unavailable("inventory", "deduct rejected"));
        }

        let key = (order_id, product_id.clone());
        if state.deductions.contains_key(&key) {
            tracing::debug!(%order_id, %product_id, "Deduction already applied");
            return Ok(());
        }
        if state.voided.contains(&key) {
            tracing::info!(%order_id, %product_id, "Order line already returned, skipping deduction");
            return Ok(());
        }

        let available = state.stock.get(product_id).copied().unwrap_or(0);
        if available < quantity {
            return Err(ServiceError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available,
            });
        }

        state.stock.insert(product_id.clone(), available - quantity);
        state.deductions.insert(key, quantity);
        Ok(())
    }

    async fn return_stock(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_return {
            return Err(ServiceError::unavailable("inventory", "return rejected"));
        }

        let key = (order_id, product_id.clone());
        let Some(&deducted) = state.deductions.get(&key) else {
            tracing::info!(%order_id, %product_id, "Return before deduction, voiding order line");
            state.voided.insert(key);
            return Ok(());
        };
        if !state.returned.insert(key) {
            return Ok(());
        }

        if deducted != quantity {
            tracing::warn!(%order_id, %product_id, deducted, quantity, "Returning deducted quantity");
        }
        *state.stock.entry(product_id.clone()).or_insert(0) += deducted;
        Ok(())
    }

    async fn available(&self, product_id: &ProductId) -> Result<u32, ServiceError> {
        Ok(self.stock(product_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_stock() -> InMemoryInventoryService {
        let service = InMemoryInventoryService::new();
        service.set_stock("SKU-001", 10);
        service
    }

    #[tokio::test]
    async fn test_deduct_is_once_per_order_line() {
        let service = service_with_stock();
        let order_id = OrderId::new();
        let sku = ProductId::new("SKU-001");

        service.deduct(order_id, &sku, 3).await.unwrap();
        service.deduct(order_id, &sku, 3).await.unwrap();

        assert_eq!(service.stock(&sku), 7);
        assert_eq!(service.deducted(order_id, &sku), Some(3));
        assert_eq!(service.deduct_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_stock_untouched() {
        let service = service_with_stock();
        let sku = ProductId::new("SKU-001");

        let result = service.deduct(OrderId::new(), &sku, 11).await;

        assert!(matches!(
            result,
            Err(ServiceError::InsufficientStock {
                requested: 11,
                available: 10,
                ..
            })
        ));
        assert_eq!(service.stock(&sku), 10);
    }

    #[tokio::test]
    async fn test_return_applies_once() {
        let service = service_with_stock();
        let order_id = OrderId::new();
        let sku = ProductId::new("SKU-001");

        service.deduct(order_id, &sku, 2).await.unwrap();
        service.return_stock(order_id, &sku, 2).await.unwrap();
        service.return_stock(order_id, &sku, 2).await.unwrap();

        assert_eq!(service.stock(&sku), 10);
        assert!(service.is_returned(order_id, &sku));
        assert!(!service.is_voided(order_id, &sku));
    }

    #[tokio::test]
    async fn test_return_before_deduct_voids_the_line() {
        let service = service_with_stock();
        let order_id = OrderId::new();
        let sku = ProductId::new("SKU-001");

        service.return_stock(order_id, &sku, 3).await.unwrap();
        assert_eq!(service.stock(&sku), 10);
        assert!(service.is_voided(order_id, &sku));

        service.deduct(order_id, &sku, 3).await.unwrap();

        assert_eq!(service.stock(&sku), 10);
        assert_eq!(service.deducted(order_id, &sku), None);
        assert_eq!(service.deduct_calls().len(), 1);

        let other_order = OrderId::new();
        service.deduct(other_order, &sku, 3).await.unwrap();
        assert_eq!(service.stock(&sku), 7);
    }

    #[tokio::test]
    async fn test_fail_on_deduct() {
        let service = service_with_stock();
        service.set_fail_on_deduct(true);
        let sku = ProductId::new("SKU-001");

        let result = service.deduct(OrderId::new(), &sku, 1).await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(service.stock(&sku), 10);
    }
}
