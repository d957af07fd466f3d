//! Order lifecycle events carried over the message bus.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;

use super::OrderStatus;

/// An item line in an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// The product identifier.
    pub product_id: ProductId,

    /// Human-readable product name.
    pub product_name: String,

    /// Quantity ordered.
    pub quantity: u32,

    /// Price per unit.
    pub unit_price: Money,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns quantity × unit price.
    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// An order was placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    order_id: OrderId,
    customer_id: CustomerId,
    items: Vec<OrderItem>,
    total_amount: Money,
    order_date: DateTime<Utc>,
    occurred_at: DateTime<Utc>,
}

impl OrderPlacedEvent {
    /// Creates the event, computing the total from the item subtotals.
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        order_date: DateTime<Utc>,
    ) -> Self {
        let total_amount = items.iter().map(OrderItem::subtotal).sum();
        Self::with_total(order_id, customer_id, items, total_amount, order_date)
    }

    /// Creates the event with a producer-supplied total.
    ///
    /// The total is taken as given; consumers do not recompute it.
    pub fn with_total(
        order_id: OrderId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        total_amount: Money,
        order_date: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            items,
            total_amount,
            order_date,
            occurred_at: Utc::now(),
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    /// Returns the items in the order they were placed.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    /// Returns the sum of the item subtotals.
    pub fn items_total(&self) -> Money {
        self.items.iter().map(OrderItem::subtotal).sum()
    }
}

impl DomainEvent for OrderPlacedEvent {
    const EVENT_TYPE: &'static str = "OrderPlacedEvent";

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// An order moved from one status to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusChangedEvent {
    order_id: OrderId,
    customer_id: CustomerId,
    previous_status: OrderStatus,
    new_status: OrderStatus,
    changed_by_id: Option<UserId>,
    notes: Option<String>,
    changed_date: DateTime<Utc>,
    occurred_at: DateTime<Utc>,
}

impl OrderStatusChangedEvent {
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        previous_status: OrderStatus,
        new_status: OrderStatus,
        changed_by_id: Option<UserId>,
        notes: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            customer_id,
            previous_status,
            new_status,
            changed_by_id,
            notes,
            changed_date: now,
            occurred_at: now,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn previous_status(&self) -> OrderStatus {
        self.previous_status
    }

    pub fn new_status(&self) -> OrderStatus {
        self.new_status
    }

    pub fn changed_by_id(&self) -> Option<UserId> {
        self.changed_by_id
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn changed_date(&self) -> DateTime<Utc> {
        self.changed_date
    }
}

impl DomainEvent for OrderStatusChangedEvent {
    const EVENT_TYPE: &'static str = "OrderStatusChangedEvent";

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// An order was cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    order_id: OrderId,
    customer_id: CustomerId,
    reason: String,
    cancelled_by_id: Option<UserId>,
    cancellation_date: DateTime<Utc>,
    occurred_at: DateTime<Utc>,
}

impl OrderCancelledEvent {
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        reason: impl Into<String>,
        cancelled_by_id: Option<UserId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            customer_id,
            reason: reason.into(),
            cancelled_by_id,
            cancellation_date: now,
            occurred_at: now,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn cancelled_by_id(&self) -> Option<UserId> {
        self.cancelled_by_id
    }

    pub fn cancellation_date(&self) -> DateTime<Utc> {
        self.cancellation_date
    }
}

impl DomainEvent for OrderCancelledEvent {
    const EVENT_TYPE: &'static str = "OrderCancelledEvent";

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
