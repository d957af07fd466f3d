//! Bounded retry policy and the headers it travels in.

use crate::BasicProperties;

/// Number of times a message has been republished for retry.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Why a message was dead-lettered.
pub const DEATH_REASON_HEADER: &str = "x-death-reason";

/// Exchange the message was first published to.
pub const ORIGINAL_EXCHANGE_HEADER: &str = "x-original-exchange";

/// Routing key the message was first published with.
pub const ORIGINAL_ROUTING_KEY_HEADER: &str = "x-original-routing-key";

/// How many times a retryable failure is redelivered before dead-lettering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// True if a message already retried `attempts` times may be retried again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }
}

/// Reads the retry count from message headers; absent or malformed is zero.
pub fn retry_count(properties: &BasicProperties) -> u32 {
    properties
        .header(RETRY_COUNT_HEADER)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_count_defaults_to_zero() {
        assert_eq!(retry_count(&BasicProperties::default()), 0);
        let garbled = BasicProperties::default().with_header(RETRY_COUNT_HEADER, "many");
        assert_eq!(retry_count(&garbled), 0);
        let twice = BasicProperties::default().with_header(RETRY_COUNT_HEADER, "2");
        assert_eq!(retry_count(&twice), 2);
    }

    #[test]
    fn test_should_retry_stops_at_limit() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::new(0).should_retry(0));
    }
}
