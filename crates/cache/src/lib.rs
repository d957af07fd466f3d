//! Read-side cache for the order fulfillment pipeline.
//!
//! This crate provides:
//! - [`CacheStore`], the backing key/value store interface, and
//!   [`InMemoryCacheStore`] with per-entry expiry
//! - [`CacheService`], typed JSON get/set with an instance-name prefix and a
//!   default time-to-live
//! - [`CacheInvalidationService`], which clears the entries a write makes stale
//! - [`CacheStatistics`], per-key hit/miss counters

pub mod config;
pub mod error;
pub mod invalidation;
pub mod keys;
pub mod service;
pub mod statistics;
pub mod store;

pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use invalidation::CacheInvalidationService;
pub use service::CacheService;
pub use statistics::{CacheMetrics, CacheStatistics};
pub use store::{CacheStore, InMemoryCacheStore};
