//! Backing key/value store for cached values.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{CacheError, Result};

/// Raw byte store with per-entry expiry.
///
/// Keys passed here are already namespaced; [`crate::CacheService`] owns the
/// instance prefix.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the bytes stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a single key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Whether a live entry exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// All live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove several keys, returning how many were present.
    async fn remove_many(&self, keys: &[String]) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

/// In-memory implementation of [`CacheStore`].
///
/// Expired entries are dropped lazily on read and during prefix scans.
#[derive(Clone, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<DashMap<String, CacheEntry>>,
    fail_on_read: Arc<AtomicBool>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads fail (for testing).
    pub fn set_fail_on_read(&self, fail: bool) {
        self.fail_on_read.store(fail, Ordering::SeqCst);
    }

    /// Make writes and removals fail (for testing).
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_on_read.load(Ordering::SeqCst) {
            return Err(CacheError::Store("Simulated read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(CacheError::Store("Simulated write failure".to_string()));
        }
        Ok(())
    }

    fn live(&self, key: &str) -> Option<Vec<u8>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        None
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_read()?;
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.check_write()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_write()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_read()?;
        Ok(self.live(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_read()?;
        self.entries.retain(|_, entry| !entry.is_expired());
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn remove_many(&self, keys: &[String]) -> Result<usize> {
        self.check_write()?;
        Ok(keys
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = InMemoryCacheStore::new();
        store.set("a", b"1".to_vec(), None).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert!(store.exists("a").await.unwrap());

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.remove("a").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = InMemoryCacheStore::new();
        store
            .set("short", b"x".to_vec(), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        store.set("forever", b"y".to_vec(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(!store.exists("short").await.unwrap());
        assert_eq!(store.get("forever").await.unwrap(), Some(b"y".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_prefix_scan_and_remove_many() {
        let store = InMemoryCacheStore::new();
        for key in ["p:products:1", "p:products:2", "p:product:9"] {
            store.set(key, Vec::new(), None).await.unwrap();
        }

        let keys = store.keys_with_prefix("p:products").await.unwrap();
        assert_eq!(keys, vec!["p:products:1", "p:products:2"]);

        let removed = store.remove_many(&keys).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let store = InMemoryCacheStore::new();
        store.set_fail_on_write(true);
        assert!(matches!(
            store.set("a", Vec::new(), None).await,
            Err(CacheError::Store(_))
        ));

        store.set_fail_on_read(true);
        assert!(store.get("a").await.is_err());
    }
}
