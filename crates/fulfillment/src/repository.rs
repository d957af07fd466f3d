//! Order persistence boundary.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;
use domain::Order;

use crate::error::ServiceError;

/// Loads and saves orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, ServiceError>;

    /// Inserts or replaces the order.
    async fn save(&self, order: &Order) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, Order>,
    save_count: usize,
    fail_on_save: bool,
}

/// In-memory order repository for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the repository to fail every save.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.state.write().unwrap().fail_on_save = fail;
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.state.read().unwrap().save_count
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, ServiceError> {
        Ok(self.state.read().unwrap().orders.get(&order_id).cloned())
    }

    async fn save(&self, order: &Order) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_save {
            return Err(ServiceError::unavailable("orders", "database unavailable"));
        }

        state.orders.insert(order.id(), order.clone());
        state.save_count += 1;
        Ok(())
    }
}
