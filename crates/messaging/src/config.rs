//! Event bus configuration.

use std::time::Duration;

use crate::RetryPolicy;

/// Default topic exchange for order events.
pub const DEFAULT_EXCHANGE: &str = "order_events";

/// Topology and retry settings for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub exchange: String,
    pub dead_letter_exchange: String,
    pub retry: RetryPolicy,
    pub reconnect: ReconnectPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::with_exchange(DEFAULT_EXCHANGE)
    }
}

impl BusConfig {
    /// Uses `exchange` and derives the dead-letter exchange as `<exchange>.dlx`.
    pub fn with_exchange(exchange: impl Into<String>) -> Self {
        let exchange = exchange.into();
        Self {
            dead_letter_exchange: format!("{exchange}.dlx"),
            exchange,
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry = RetryPolicy::new(max_retries);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Name of the queue holding dead-lettered messages for `queue`.
    pub fn dead_letter_queue(queue: &str) -> String {
        format!("{queue}.dead-letter")
    }
}

/// How often the bus supervisor checks the broker, and how far it backs off
/// while the broker stays unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }

    /// Delay after a failed attempt that waited `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}
