use std::sync::Arc;

use cache::{CacheConfig, CacheService, CacheStatistics, InMemoryCacheStore, keys};
use common::ProductId;
use criterion::{Criterion, criterion_group, criterion_main};

fn make_cache() -> CacheService {
    CacheService::new(
        Arc::new(InMemoryCacheStore::new()),
        Arc::new(CacheStatistics::new()),
        &CacheConfig::default(),
    )
}

fn bench_get_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache = make_cache();
    let key = keys::product(&ProductId::new("p1"));
    rt.block_on(cache.set(&key, "widget", None)).unwrap();

    c.bench_function("cache_get_hit", |b| {
        b.to_async(&rt)
            .iter(|| async { cache.get::<String>(&key).await.unwrap() });
    });
}

fn bench_remove_by_prefix(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache = make_cache();

    c.bench_function("cache_remove_by_prefix_1000_keys", |b| {
        b.to_async(&rt).iter(|| async {
            for page in 0..100 {
                cache
                    .set(&keys::products_page(page, 20), &page, None)
                    .await
                    .unwrap();
            }
            for n in 0..900 {
                cache
                    .set(&keys::product(&ProductId::new(format!("p{n}"))), &n, None)
                    .await
                    .unwrap();
            }
            cache.remove_by_prefix(keys::PRODUCTS_PREFIX).await.unwrap()
        });
    });
}

fn bench_statistics(c: &mut Criterion) {
    let stats = CacheStatistics::new();

    c.bench_function("cache_statistics_record", |b| {
        b.iter(|| {
            stats.record_hit("product:p1");
            stats.record_miss("product:p2");
        });
    });
}

criterion_group!(
    benches,
    bench_get_hit,
    bench_remove_by_prefix,
    bench_statistics
);
criterion_main!(benches);
