//! HTTP route handlers.

pub mod cache;
pub mod failed_messages;
pub mod health;
pub mod metrics;
