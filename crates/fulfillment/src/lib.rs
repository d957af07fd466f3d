//! Order fulfillment side effects.
//!
//! This crate provides:
//! - External service traits (inventory, notification, payment, shipping)
//!   with in-memory implementations
//! - The three order event handlers and the [`HandlerRegistry`] that
//!   subscribes them
//! - The post-order job chain
//! - [`OrderCommandService`], the write path that persists an order change
//!   and triggers its side effects

pub mod command;
pub mod error;
pub mod handlers;
pub mod post_order;
pub mod registry;
pub mod repository;
pub mod services;

pub use command::OrderCommandService;
pub use error::{OrderServiceError, Result, ServiceError};
pub use handlers::{
    OrderCancelledEventHandler, OrderPlacedEventHandler, OrderStatusChangedEventHandler,
};
pub use post_order::{PostOrderChain, PostOrderServices};
pub use registry::HandlerRegistry;
pub use repository::{InMemoryOrderRepository, OrderRepository};
pub use services::{
    InMemoryInventoryService, InMemoryNotificationService, InMemoryPaymentService,
    InMemoryShippingService, InventoryService, Notification, NotificationService, PaymentResult,
    PaymentService, ShipmentResult, ShippingService,
};

/// Queue consuming `OrderPlacedEvent`.
pub const ORDER_PLACED_QUEUE: &str = "fulfillment.order-placed";
/// Queue consuming `OrderStatusChangedEvent`.
pub const ORDER_STATUS_CHANGED_QUEUE: &str = "fulfillment.order-status-changed";
/// Queue consuming `OrderCancelledEvent`.
pub const ORDER_CANCELLED_QUEUE: &str = "fulfillment.order-cancelled";
