//! Order record and its lifecycle rules.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{
    OrderCancelledEvent, OrderError, OrderItem, OrderPlacedEvent, OrderStatus,
    OrderStatusChangedEvent,
};

/// An order as held by the persistence layer.
///
/// Every mutating method validates first and only then changes state, so a
/// rejected transition leaves the record untouched. Each successful mutation
/// returns the event the caller must publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    status: OrderStatus,
    items: Vec<OrderItem>,
    total_amount: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Places a new order in `Pending` status.
    pub fn place(
        customer_id: CustomerId,
        items: Vec<OrderItem>,
    ) -> Result<(Order, OrderPlacedEvent), OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    quantity: item.quantity,
                });
            }
            if item.unit_price.cents() <= 0 {
                return Err(OrderError::InvalidPrice {
                    price: item.unit_price.cents(),
                });
            }
        }

        let now = Utc::now();
        let id = OrderId::new();
        let event = OrderPlacedEvent::new(id, customer_id, items.clone(), now);
        let order = Order {
            id,
            customer_id,
            status: OrderStatus::Pending,
            total_amount: event.total_amount(),
            items,
            created_at: now,
            updated_at: now,
        };

        Ok((order, event))
    }

    /// Moves the order one step forward in the fulfilment pipeline.
    ///
    /// Cancellation must go through [`Order::cancel`] so that a reason is
    /// always recorded.
    pub fn change_status(
        &mut self,
        new_status: OrderStatus,
        changed_by: Option<UserId>,
        notes: Option<String>,
    ) -> Result<OrderStatusChangedEvent, OrderError> {
        if new_status == OrderStatus::Cancelled || !self.status.can_transition_to(new_status) {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "change status",
            });
        }

        let previous = self.status;
        self.status = new_status;
        self.updated_at = Utc::now();

        Ok(OrderStatusChangedEvent::new(
            self.id,
            self.customer_id,
            previous,
            new_status,
            changed_by,
            notes,
        ))
    }

    /// Cancels the order.
    ///
    /// Only `Pending` and `Processing` orders can be cancelled.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        cancelled_by: Option<UserId>,
    ) -> Result<OrderCancelledEvent, OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "cancel",
            });
        }

        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(OrderError::ReasonRequired);
        }

        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();

        Ok(OrderCancelledEvent::new(
            self.id,
            self.customer_id,
            reason,
            cancelled_by,
        ))
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
