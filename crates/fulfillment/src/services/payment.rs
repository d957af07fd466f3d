//! Payment capture for the post-order chain, with an in-memory gateway.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CustomerId, Money, OrderId};

use crate::error::ServiceError;

/// Result of a successful payment capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    /// The payment ID assigned by the payment service.
    pub payment_id: String,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Captures payment for an order. Capturing an order twice returns the
    /// first payment.
    async fn capture(
        &self,
        order_id: OrderId,
        customer_id: CustomerId,
        amount: Money,
    ) -> Result<PaymentResult, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<OrderId, (String, CustomerId, Money)>,
    next_id: u32,
    fail_on_capture: bool,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every capture.
    pub fn set_fail_on_capture(&self, fail: bool) {
        self.state.write().unwrap().fail_on_capture = fail;
    }

    /// Returns the number of captured payments.
    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().payments.len()
    }

    /// Amount captured for an order, if any.
    pub fn captured(&self, order_id: OrderId) -> Option<Money> {
        self.state
            .read()
            .unwrap()
            .payments
            .get(&order_id)
            .map(|(_, _, amount)| *amount)
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn capture(
        &self,
        order_id: OrderId,
        customer_id: CustomerId,
        amount: Money,
    ) -> Result<PaymentResult, ServiceError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_capture {
            return Err(ServiceError::unavailable("payment", "payment declined"));
        }

        if let Some((payment_id, _, _)) = state.payments.get(&order_id) {
            return Ok(PaymentResult {
                payment_id: payment_id.clone(),
            });
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state
            .payments
            .insert(order_id, (payment_id.clone(), customer_id, amount));

        Ok(PaymentResult { payment_id })
    }
}
