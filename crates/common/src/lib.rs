//! Shared types for the order fulfillment pipeline.
//!
//! Every crate in the workspace speaks in terms of these identifiers and the
//! [`Money`] amount type, so events and job arguments serialize the same way
//! wherever they travel.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{CategoryId, CustomerId, OrderId, ProductId, UserId};
