//! Order record, lifecycle events and status machine.

mod events;
mod model;
mod status;

pub use events::{OrderCancelledEvent, OrderItem, OrderPlacedEvent, OrderStatusChangedEvent};
pub use model::Order;
pub use status::OrderStatus;

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in a status that allows the requested action.
    #[error("Invalid state transition: cannot {action} from {current_status} status")]
    InvalidStateTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Invalid price.
    #[error("Invalid price: {price} (must be greater than 0)")]
    InvalidPrice { price: i64 },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Cancellation reason is required.
    #[error("Cancellation reason is required")]
    ReasonRequired,
}
