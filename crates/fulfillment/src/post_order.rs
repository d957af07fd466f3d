//! Background work chained after an order is placed.
//!
//! Verification runs first; payment capture, shipment preparation and the
//! shipment confirmation email each continue the previous job, so a failed
//! step holds back everything after it until an operator requeues it.

use std::sync::Arc;

use async_trait::async_trait;
use common::{CustomerId, Money, OrderId};
use domain::{Order, OrderStatus};
use jobs::{Job, JobClient, JobFailure, JobId};
use serde_json::json;

use crate::error::{OrderServiceError, Result, ServiceError};
use crate::repository::OrderRepository;
use crate::services::{Notification, NotificationService, PaymentService, ShippingService};

/// Job ids of one order's post-order chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostOrderChain {
    pub verify: JobId,
    pub capture_payment: JobId,
    pub prepare_shipment: JobId,
    pub send_confirmation: JobId,
}

/// Services the post-order jobs call.
#[derive(Clone)]
pub struct PostOrderServices {
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentService>,
    pub shipping: Arc<dyn ShippingService>,
    pub notifications: Arc<dyn NotificationService>,
}

impl PostOrderServices {
    /// Enqueues verification of `order` and chains the remaining steps
    /// behind it.
    pub fn enqueue_chain(&self, client: &dyn JobClient, order: &Order) -> Result<PostOrderChain> {
        let order_id = order.id();
        let customer_id = order.customer_id();

        let verify = client.enqueue(Box::new(VerifyOrderJob {
            orders: Arc::clone(&self.orders),
            order_id,
        }));
        let capture_payment = continue_with(
            client,
            verify,
            Box::new(CapturePaymentJob {
                payments: Arc::clone(&self.payments),
                order_id,
                customer_id,
                amount: order.total_amount(),
            }),
        )?;
        let prepare_shipment = continue_with(
            client,
            capture_payment,
            Box::new(PrepareShipmentJob {
                shipping: Arc::clone(&self.shipping),
                order_id,
            }),
        )?;
        let send_confirmation = continue_with(
            client,
            prepare_shipment,
            Box::new(SendConfirmationEmailJob {
                shipping: Arc::clone(&self.shipping),
                notifications: Arc::clone(&self.notifications),
                order_id,
                customer_id,
            }),
        )?;

        tracing::debug!(%order_id, %verify, %send_confirmation, "Post-order jobs chained");
        Ok(PostOrderChain {
            verify,
            capture_payment,
            prepare_shipment,
            send_confirmation,
        })
    }
}

fn continue_with(client: &dyn JobClient, parent: JobId, job: Box<dyn Job>) -> Result<JobId> {
    client
        .continue_job_with(parent, job)
        .ok_or(OrderServiceError::JobChain(parent))
}

/// Checks the order still exists and was not cancelled in the meantime.
pub struct VerifyOrderJob {
    orders: Arc<dyn OrderRepository>,
    order_id: OrderId,
}

#[async_trait]
impl Job for VerifyOrderJob {
    fn job_type(&self) -> &'static str {
        "VerifyOrderJob"
    }

    fn method(&self) -> &'static str {
        "verify"
    }

    fn arguments(&self) -> serde_json::Value {
        json!({ "order_id": self.order_id })
    }

    async fn run(&self) -> std::result::Result<(), JobFailure> {
        let order = self
            .orders
            .get(self.order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(self.order_id))?;

        if order.status() == OrderStatus::Cancelled {
            return Err(JobFailure::new(
                "OrderCancelled",
                format!("Order {} was cancelled", self.order_id),
            ));
        }
        Ok(())
    }
}

pub struct CapturePaymentJob {
    payments: Arc<dyn PaymentService>,
    order_id: OrderId,
    customer_id: CustomerId,
    amount: Money,
}

#[async_trait]
impl Job for CapturePaymentJob {
    fn job_type(&self) -> &'static str {
        "CapturePaymentJob"
    }

    fn method(&self) -> &'static str {
        "capture"
    }

    fn arguments(&self) -> serde_json::Value {
        json!({
            "order_id": self.order_id,
            "customer_id": self.customer_id,
            "amount": self.amount,
        })
    }

    async fn run(&self) -> std::result::Result<(), JobFailure> {
        let payment = self
            .payments
            .capture(self.order_id, self.customer_id, self.amount)
            .await?;
        tracing::info!(order_id = %self.order_id, payment_id = %payment.payment_id, "Payment captured");
        Ok(())
    }
}

pub struct PrepareShipmentJob {
    shipping: Arc<dyn ShippingService>,
    order_id: OrderId,
}

#[async_trait]
impl Job for PrepareShipmentJob {
    fn job_type(&self) -> &'static str {
        "PrepareShipmentJob"
    }

    fn method(&self) -> &'static str {
        "prepare"
    }

    fn arguments(&self) -> serde_json::Value {
        json!({ "order_id": self.order_id })
    }

    async fn run(&self) -> std::result::Result<(), JobFailure> {
        let shipment = self.shipping.prepare_shipment(self.order_id).await?;
        tracing::info!(order_id = %self.order_id, tracking_number = %shipment.tracking_number, "Shipment prepared");
        Ok(())
    }
}

/// Emails the customer the tracking number of the prepared shipment.
pub struct SendConfirmationEmailJob {
    shipping: Arc<dyn ShippingService>,
    notifications: Arc<dyn NotificationService>,
    order_id: OrderId,
    customer_id: CustomerId,
}

#[async_trait]
impl Job for SendConfirmationEmailJob {
    fn job_type(&self) -> &'static str {
        "SendConfirmationEmailJob"
    }

    fn method(&self) -> &'static str {
        "send"
    }

    fn arguments(&self) -> serde_json::Value {
        json!({
            "order_id": self.order_id,
            "customer_id": self.customer_id,
        })
    }

    async fn run(&self) -> std::result::Result<(), JobFailure> {
        let shipment = self.shipping.shipment_for(self.order_id).await?.ok_or_else(|| {
            JobFailure::new(
                "ShipmentMissing",
                format!("No shipment prepared for order {}", self.order_id),
            )
        })?;

        self.notifications
            .send(Notification::ShipmentConfirmation {
                order_id: self.order_id,
                customer_id: self.customer_id,
                tracking_number: shipment.tracking_number,
            })
            .await?;
        Ok(())
    }
}
