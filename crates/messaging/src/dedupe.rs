//! Guard against handling a redelivered message twice.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::Result;

/// Remembers which messages a queue has already handled.
#[async_trait]
pub trait ProcessedMessageStore: Send + Sync {
    async fn is_processed(&self, queue: &str, message_id: &str) -> Result<bool>;

    async fn mark_processed(&self, queue: &str, message_id: &str) -> Result<()>;
}

/// Concurrent in-memory store bounded by age and size.
///
/// Entries older than the retention window are forgotten. When the store
/// grows past its capacity the oldest entries are dropped first.
pub struct InMemoryProcessedMessageStore {
    entries: DashMap<(String, String), Instant>,
    retention: Duration,
    capacity: usize,
}

impl Default for InMemoryProcessedMessageStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60), 100_000)
    }
}

impl InMemoryProcessedMessageStore {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, seen| now.duration_since(*seen) < self.retention);

        let excess = self.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<((String, String), Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        by_age.sort_by_key(|(_, seen)| *seen);
        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl ProcessedMessageStore for InMemoryProcessedMessageStore {
    async fn is_processed(&self, queue: &str, message_id: &str) -> Result<bool> {
        let key = (queue.to_string(), message_id.to_string());
        Ok(self
            .entries
            .get(&key)
            .is_some_and(|seen| seen.elapsed() < self.retention))
    }

    async fn mark_processed(&self, queue: &str, message_id: &str) -> Result<()> {
        self.entries
            .insert((queue.to_string(), message_id.to_string()), Instant::now());
        if self.entries.len() > self.capacity {
            self.prune();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_processed_is_scoped_per_queue() {
        let store = InMemoryProcessedMessageStore::default();
        store.mark_processed("inventory", "m1").await.unwrap();

        assert!(store.is_processed("inventory", "m1").await.unwrap());
        assert!(!store.is_processed("notifications", "m1").await.unwrap());
        assert!(!store.is_processed("inventory", "m2").await.unwrap());
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let store = InMemoryProcessedMessageStore::new(Duration::from_secs(60), 2);
        store.mark_processed("q", "m1").await.unwrap();
        std::thread::sleep(Duration::from_millis(2));
        store.mark_processed("q", "m2").await.unwrap();
        std::thread::sleep(Duration::from_millis(2));
        store.mark_processed("q", "m3").await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(!store.is_processed("q", "m1").await.unwrap());
        assert!(store.is_processed("q", "m3").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_processed() {
        let store = InMemoryProcessedMessageStore::new(Duration::ZERO, 10);
        store.mark_processed("q", "m1").await.unwrap();
        assert!(!store.is_processed("q", "m1").await.unwrap());
    }
}
