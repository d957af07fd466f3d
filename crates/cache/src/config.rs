//! Cache configuration.

use std::time::Duration;

/// Settings for the cache collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Identifies the backing store; logged at startup.
    pub connection_string: String,
    /// Prefix applied to every key.
    pub instance_name: String,
    /// Time-to-live used when a write gives none.
    pub default_expiry: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            connection_string: "memory://cache".to_string(),
            instance_name: "fulfillment:".to_string(),
            default_expiry: Duration::from_secs(30 * 60),
        }
    }
}

impl CacheConfig {
    pub fn with_instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = instance_name.into();
        self
    }

    pub fn with_default_expiry(mut self, default_expiry: Duration) -> Self {
        self.default_expiry = default_expiry;
        self
    }
}
