use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

use pos_query_core::cache::{GetOptions, RequestDeduplicator, ResultCache};
use pos_query_core::config::{DeduplicationConfig, ResultCacheConfig};
use pos_query_core::error::QueryError;
use pos_query_core::isolation::{scope_query, BranchSharingConfig, EntityType, TenantContext};
use pos_query_core::query_builder::QuerySpec;

fn benchmark_scope_query(c: &mut Criterion) {
    let config = BranchSharingConfig::hybrid().with_share(EntityType::Products, false);
    let tenant = TenantContext::new("B1");

    c.bench_function("scope_query_hybrid", |b| {
        b.iter(|| {
            let spec = QuerySpec::new(EntityType::Products)
                .where_eq("is_active", true)
                .order_desc("created_at")
                .limit(50);
            black_box(scope_query(spec, &tenant, Some(&config)))
        })
    });
}

fn benchmark_cache_key(c: &mut Criterion) {
    let spec = QuerySpec::new(EntityType::Sales)
        .where_eq("branch_id", "B1")
        .where_eq("status", "completed")
        .order_desc("created_at")
        .limit(100);

    c.bench_function("cache_key", |b| b.iter(|| black_box(spec.cache_key())));
}

fn benchmark_result_cache_hit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let cache: ResultCache<u64> = ResultCache::new("bench", &ResultCacheConfig::default());
    cache.set("products?select=*", 1, Duration::from_secs(3600));

    c.bench_function("result_cache_hit", |b| {
        b.iter(|| {
            runtime.block_on(cache.get(
                "products?select=*",
                || async { Ok::<_, QueryError>(2) },
                GetOptions::default(),
            ))
        })
    });
}

fn benchmark_dedup_cached(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let dedup: RequestDeduplicator<u64, QueryError> = RequestDeduplicator::new(
        "bench",
        &DeduplicationConfig {
            default_ttl_ms: 3_600_000,
            ..DeduplicationConfig::default()
        },
    );
    runtime
        .block_on(dedup.query("customers?select=*", || async { Ok(1) }))
        .unwrap();

    c.bench_function("dedup_cached", |b| {
        b.iter(|| runtime.block_on(dedup.query("customers?select=*", || async { Ok(2) })))
    });
}

criterion_group!(
    benches,
    benchmark_scope_query,
    benchmark_cache_key,
    benchmark_result_cache_hit,
    benchmark_dedup_cached
);
criterion_main!(benches);
