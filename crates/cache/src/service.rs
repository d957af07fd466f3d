//! Typed JSON cache over a [`CacheStore`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::statistics::CacheStatistics;
use crate::store::CacheStore;

/// Namespaced cache with a default time-to-live and hit/miss accounting.
///
/// Callers pass un-prefixed keys; statistics are kept against those keys.
#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    statistics: Arc<CacheStatistics>,
    instance_name: String,
    default_expiry: Duration,
}

impl CacheService {
    pub fn new(
        store: Arc<dyn CacheStore>,
        statistics: Arc<CacheStatistics>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            statistics,
            instance_name: config.instance_name.clone(),
            default_expiry: config.default_expiry,
        }
    }

    pub fn statistics(&self) -> &Arc<CacheStatistics> {
        &self.statistics
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.instance_name, key)
    }

    /// Look up a value. An entry that no longer decodes as `T` counts as a
    /// miss and is evicted.
    #[tracing::instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let namespaced = self.namespaced(key);
        let Some(bytes) = self.store.get(&namespaced).await? else {
            self.statistics.record_miss(key);
            return Ok(None);
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                self.statistics.record_hit(key);
                Ok(Some(value))
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Evicting cache entry that failed to decode");
                self.statistics.record_miss(key);
                self.store.remove(&namespaced).await?;
                Ok(None)
            }
        }
    }

    /// Store a value, using the configured default expiry when `ttl` is `None`.
    #[tracing::instrument(skip(self, value))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let ttl = ttl.unwrap_or(self.default_expiry);
        self.store.set(&self.namespaced(key), bytes, Some(ttl)).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(&self.namespaced(key)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.store.exists(&self.namespaced(key)).await
    }

    /// Remove every key starting with `prefix`. Scans the whole keyspace, so
    /// keep it to coarse invalidation.
    #[tracing::instrument(skip(self))]
    pub async fn remove_by_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.store.keys_with_prefix(&self.namespaced(prefix)).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.remove_many(&keys).await?;
        tracing::debug!(prefix, removed, "Removed cache entries by prefix");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCacheStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Product {
        name: String,
        stock: u32,
    }

    fn setup() -> (CacheService, InMemoryCacheStore) {
        let store = InMemoryCacheStore::new();
        let service = CacheService::new(
            Arc::new(store.clone()),
            Arc::new(CacheStatistics::new()),
            &CacheConfig::default().with_instance_name("test:"),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_roundtrip_records_hit_and_miss() {
        let (service, store) = setup();
        let widget = Product {
            name: "Widget".to_string(),
            stock: 3,
        };

        assert_eq!(service.get::<Product>("product:1").await.unwrap(), None);
        service.set("product:1", &widget, None).await.unwrap();
        assert_eq!(
            service.get::<Product>("product:1").await.unwrap(),
            Some(widget)
        );

        assert!(store.exists("test:product:1").await.unwrap());
        let metrics = service.statistics().metrics("product:1");
        assert_eq!((metrics.hits, metrics.misses), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_expiry_applies() {
        let store = InMemoryCacheStore::new();
        let service = CacheService::new(
            Arc::new(store),
            Arc::new(CacheStatistics::new()),
            &CacheConfig::default().with_default_expiry(Duration::from_secs(60)),
        );
        service.set("k", &1u32, None).await.unwrap();
        service
            .set("long", &2u32, Some(Duration::from_secs(600)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(!service.exists("k").await.unwrap());
        assert!(service.exists("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss_and_evicted() {
        let (service, store) = setup();
        store
            .set("test:product:1", b"not json".to_vec(), None)
            .await
            .unwrap();

        assert_eq!(service.get::<Product>("product:1").await.unwrap(), None);
        assert!(!store.exists("test:product:1").await.unwrap());
        assert_eq!(service.statistics().metrics("product:1").misses, 1);
    }

    #[tokio::test]
    async fn test_remove_by_prefix_only_touches_matching_keys() {
        let (service, store) = setup();
        for key in ["products:page:1", "products:page:2", "product:1", "orders:1"] {
            service.set(key, &0u32, None).await.unwrap();
        }
        store.set("other:products:1", Vec::new(), None).await.unwrap();

        let removed = service.remove_by_prefix("products").await.unwrap();

        assert_eq!(removed, 2);
        assert!(!service.exists("products:page:1").await.unwrap());
        assert!(!service.exists("products:page:2").await.unwrap());
        assert!(service.exists("product:1").await.unwrap());
        assert!(service.exists("orders:1").await.unwrap());
        assert!(store.exists("other:products:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let (service, store) = setup();
        store.set_fail_on_write(true);
        assert!(service.set("k", &1u32, None).await.is_err());
        assert!(service.remove("k").await.is_err());
    }
}
