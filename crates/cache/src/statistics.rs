//! Per-key cache hit/miss accounting.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of the counters for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub key: String,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

impl CacheMetrics {
    fn new(key: String, hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let hit_ratio = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            key,
            hits,
            misses,
            hit_ratio,
        }
    }

    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Thread-safe hit/miss counters keyed by the caller's cache key.
///
/// Counts are process-local and reset on restart.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    counters: DashMap<String, Counters>,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, key: &str) {
        self.counters
            .entry(key.to_string())
            .or_default()
            .hits
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_hits_total").increment(1);
    }

    pub fn record_miss(&self, key: &str) {
        self.counters
            .entry(key.to_string())
            .or_default()
            .misses
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_misses_total").increment(1);
    }

    /// Counters for one key; a key never looked up reports zeros.
    pub fn metrics(&self, key: &str) -> CacheMetrics {
        match self.counters.get(key) {
            Some(counters) => CacheMetrics::new(
                key.to_string(),
                counters.hits.load(Ordering::Relaxed),
                counters.misses.load(Ordering::Relaxed),
            ),
            None => CacheMetrics::new(key.to_string(), 0, 0),
        }
    }

    /// Counters for every key seen, ordered by key.
    pub fn all(&self) -> Vec<CacheMetrics> {
        let mut all: Vec<CacheMetrics> = self
            .counters
            .iter()
            .map(|entry| {
                CacheMetrics::new(
                    entry.key().clone(),
                    entry.hits.load(Ordering::Relaxed),
                    entry.misses.load(Ordering::Relaxed),
                )
            })
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn reset(&self) {
        self.counters.clear();
    }
}
