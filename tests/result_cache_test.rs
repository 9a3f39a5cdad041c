//! Result cache expiry, stale-while-revalidate and invalidation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time::sleep;

use pos_query_core::cache::{GetOptions, ResultCache};
use pos_query_core::config::ResultCacheConfig;
use pos_query_core::error::QueryError;
use pos_query_core::utils::ManualClock;

fn cache_config(default_ttl_ms: u64, max_entries: usize) -> ResultCacheConfig {
    ResultCacheConfig {
        default_ttl_ms,
        max_entries,
        sweep_interval_ms: 1_000,
    }
}

fn fetch_value(
    calls: &Arc<AtomicUsize>,
    value: i64,
) -> impl FnOnce() -> futures::future::Ready<Result<i64, QueryError>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok(value))
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_value_expires_after_ttl() {
    let clock = ManualClock::new(0);
    let cache: ResultCache<i64> =
        ResultCache::with_clock("scenario_b", &cache_config(100, 10), clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    cache.set("x", 1, Duration::from_millis(100));

    clock.set(50);
    let hit = cache
        .get("x", fetch_value(&calls, 2), GetOptions::default())
        .await
        .unwrap();
    assert_eq!(hit, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    clock.set(150);
    let miss = cache
        .get("x", fetch_value(&calls, 2), GetOptions::default())
        .await
        .unwrap();
    assert_eq!(miss, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_per_call_ttl_overrides_default() {
    let clock = ManualClock::new(0);
    let cache: ResultCache<i64> =
        ResultCache::with_clock("per_call_ttl", &cache_config(10_000, 10), clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .get(
            "suppliers",
            fetch_value(&calls, 7),
            GetOptions::with_ttl(Duration::from_millis(20)),
        )
        .await
        .unwrap();

    clock.set(19);
    assert_eq!(cache.peek("suppliers"), Some(7));
    clock.set(20);
    assert_eq!(cache.peek("suppliers"), None);
}

#[tokio::test]
async fn test_stale_value_served_while_refreshing() {
    let clock = ManualClock::new(0);
    let cache: ResultCache<i64> =
        ResultCache::with_clock("swr", &cache_config(100, 10), clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    cache.set("categories", 1, Duration::from_millis(100));
    clock.set(500);

    let options = GetOptions::default().stale_while_revalidate();
    let stale = cache
        .get("categories", fetch_value(&calls, 2), options)
        .await
        .unwrap();
    assert_eq!(stale, 1);

    wait_until(|| cache.stats().background_refreshes == 1).await;
    assert_eq!(cache.peek("categories"), Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().stale_hits, 1);
}

#[tokio::test]
async fn test_failed_refresh_keeps_stale_entry() {
    let clock = ManualClock::new(0);
    let cache: ResultCache<i64> =
        ResultCache::with_clock("swr_failure", &cache_config(100, 10), clock.clone());

    cache.set("accounts", 10, Duration::from_millis(100));
    clock.set(200);

    let options = GetOptions::default().stale_while_revalidate();
    let stale = cache
        .get(
            "accounts",
            || async { Err::<i64, _>(QueryError::Upstream("boom".to_string())) },
            options,
        )
        .await
        .unwrap();
    assert_eq!(stale, 10);

    wait_until(|| cache.stats().refresh_failures == 1).await;
    let again = cache
        .get(
            "accounts",
            || async { Err::<i64, _>(QueryError::Upstream("still down".to_string())) },
            options,
        )
        .await
        .unwrap();
    assert_eq!(again, 10);
}

#[tokio::test]
async fn test_shutdown_cancels_background_refresh() {
    let clock = ManualClock::new(0);
    let cache: ResultCache<i64> =
        ResultCache::with_clock("swr_shutdown", &cache_config(100, 10), clock.clone());

    cache.set("reports", 1, Duration::from_millis(100));
    clock.set(200);

    let options = GetOptions::default().stale_while_revalidate();
    cache
        .get(
            "reports",
            || async {
                sleep(Duration::from_millis(200)).await;
                Ok::<_, QueryError>(2)
            },
            options,
        )
        .await
        .unwrap();

    cache.shutdown();
    sleep(Duration::from_millis(300)).await;

    let stats = cache.stats();
    assert_eq!(stats.background_refreshes, 0);
    assert_eq!(stats.refresh_failures, 0);
    clock.set(250);
    assert_eq!(cache.peek("reports"), None);
}

#[tokio::test]
async fn test_capacity_evicts_oldest_insertion() {
    let cache: ResultCache<i64> = ResultCache::new("capacity", &cache_config(60_000, 3));

    for (i, key) in ["a", "b", "c"].iter().enumerate() {
        cache.set(*key, i as i64, Duration::from_secs(60));
    }
    cache.set("d", 3, Duration::from_secs(60));

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.peek("a"), None);
    assert_eq!(cache.peek("d"), Some(3));
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test]
async fn test_pattern_invalidation_and_errors_are_not_cached() {
    let cache: ResultCache<i64> = ResultCache::new("patterns", &cache_config(60_000, 10));
    let calls = Arc::new(AtomicUsize::new(0));

    cache.set("products?where=branch_id=B1", 1, Duration::from_secs(60));
    cache.set("products?where=branch_id=B2", 2, Duration::from_secs(60));
    cache.set("customers?where=", 3, Duration::from_secs(60));

    let pattern = Regex::new(r"^products\?").unwrap();
    assert_eq!(cache.invalidate_pattern(&pattern), 2);
    assert_eq!(cache.len(), 1);

    let failed = cache
        .get(
            "sales",
            || async { Err::<i64, _>(QueryError::Upstream("relation missing".to_string())) },
            GetOptions::default(),
        )
        .await;
    assert!(failed.is_err());
    assert_eq!(cache.peek("sales"), None);

    let loaded = cache
        .get("sales", fetch_value(&calls, 9), GetOptions::default())
        .await
        .unwrap();
    assert_eq!(loaded, 9);
}

#[tokio::test]
async fn test_refresh_in_flight_does_not_undo_invalidation() {
    let clock = ManualClock::new(0);
    let cache: ResultCache<i64> =
        ResultCache::with_clock("swr_invalidate", &cache_config(100, 10), clock.clone());

    cache.set("products", 1, Duration::from_millis(1));
    clock.set(10);

    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let stale = cache
        .get(
            "products",
            move || async move {
                let _ = gate.await;
                Ok::<_, QueryError>(2)
            },
            GetOptions::default().stale_while_revalidate(),
        )
        .await
        .unwrap();
    assert_eq!(stale, 1);

    // A write lands while the refresh still holds pre-write rows
    assert!(cache.invalidate("products"));
    release.send(()).unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(cache.peek("products"), None);
    assert_eq!(cache.stats().background_refreshes, 0);
}

#[tokio::test]
async fn test_fetch_started_before_pattern_invalidation_is_not_stored() {
    let cache: ResultCache<i64> = ResultCache::new("miss_invalidate", &cache_config(60_000, 10));

    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let loader = cache.clone();
    let pending = tokio::spawn(async move {
        loader
            .get(
                "sales?where=branch_id=B1",
                move || async move {
                    let _ = gate.await;
                    Ok::<_, QueryError>(5)
                },
                GetOptions::default(),
            )
            .await
    });

    wait_until(|| cache.stats().misses == 1).await;
    let pattern = Regex::new(r"^sales\?").unwrap();
    cache.invalidate_pattern(&pattern);
    release.send(()).unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), 5);
    assert_eq!(cache.peek("sales?where=branch_id=B1"), None);

    // Fetches that start after the invalidation store normally
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .get("sales?where=branch_id=B1", fetch_value(&calls, 6), GetOptions::default())
        .await
        .unwrap();
    assert_eq!(cache.peek("sales?where=branch_id=B1"), Some(6));
}
