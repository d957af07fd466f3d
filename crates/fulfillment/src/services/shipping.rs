//! Shipment preparation for the post-order chain, with an in-memory carrier.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;

use crate::error::ServiceError;

/// Result of a successful shipment preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentResult {
    /// The tracking number assigned by the shipping service.
    pub tracking_number: String,
}

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Prepares a shipment for an order. Preparing twice returns the first
    /// shipment.
    async fn prepare_shipment(&self, order_id: OrderId) -> Result<ShipmentResult, ServiceError>;

    /// The shipment prepared for an order, if any.
    async fn shipment_for(&self, order_id: OrderId) -> Result<Option<ShipmentResult>, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: HashMap<OrderId, String>,
    next_id: u32,
    fail_on_prepare: bool,
}

/// In-memory shipping service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<InMemoryShippingState>>,
}

impl InMemoryShippingService {
    /// Creates a new in-memory shipping service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every preparation.
    pub fn set_fail_on_prepare(&self, fail: bool) {
        self.state.write().unwrap().fail_on_prepare = fail;
    }

    /// Returns the number of prepared shipments.
    pub fn shipment_count(&self) -> usize {
        self.state.read().unwrap().shipments.len()
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn prepare_shipment(&self, order_id: OrderId) -> Result<ShipmentResult, ServiceError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_prepare {
            return Err(ServiceError::unavailable("shipping", "carrier unavailable"));
        }

        if let Some(tracking_number) = state.shipments.get(&order_id) {
            return Ok(ShipmentResult {
                tracking_number: tracking_number.clone(),
            });
        }

        state.next_id += 1;
        let tracking_number = format!("TRACK-{:04}", state.next_id);
        state.shipments.insert(order_id, tracking_number.clone());

        Ok(ShipmentResult { tracking_number })
    }

    async fn shipment_for(&self, order_id: OrderId) -> Result<Option<ShipmentResult>, ServiceError> {
        Ok(self
            .state
            .read()
            .unwrap()
            .shipments
            .get(&order_id)
            .map(|tracking_number| ShipmentResult {
                tracking_number: tracking_number.clone(),
            }))
    }
}
