//! Domain layer for the order fulfillment pipeline.
//!
//! This crate provides:
//! - The [`DomainEvent`] trait and its publication contract (routing key)
//! - The three order lifecycle events carried over the message bus
//! - The order status state machine and the [`Order`] record that enforces it

pub mod event;
pub mod order;

pub use event::DomainEvent;
pub use order::{
    Order, OrderCancelledEvent, OrderError, OrderItem, OrderPlacedEvent, OrderStatus,
    OrderStatusChangedEvent,
};
