//! TTL result cache with stale-while-revalidate and insertion-order eviction.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use crate::config::ResultCacheConfig;
use crate::logging::log_cache_operation;
use crate::utils::{Clock, ScheduledTask, SystemClock};

const COMPONENT: &str = "result_cache";

/// Per-call behaviour for [`ResultCache::get`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Overrides the cache's default TTL for a value fetched by this call
    pub ttl: Option<Duration>,
    /// Serve an expired entry immediately and refresh it in the background
    pub stale_while_revalidate: bool,
    /// Skip the lookup and always fetch
    pub force_refresh: bool,
}

impl GetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn stale_while_revalidate(mut self) -> Self {
        self.stale_while_revalidate = true;
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub evictions: u64,
    pub background_refreshes: u64,
    pub refresh_failures: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.stale_hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            (self.hits + self.stale_hits) as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    evictions: AtomicU64,
    background_refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

#[derive(Debug)]
struct Store<T> {
    entries: HashMap<String, CacheEntry<T>>,
    next_seq: u64,
    /// Bumped by every invalidation; fetches started under an older epoch
    /// do not store their result.
    epoch: u64,
}

impl<T> Store<T> {
    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.seq)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&oldest);
        Some(oldest)
    }
}

#[derive(Debug)]
struct CacheInner<T> {
    name: String,
    default_ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    store: Mutex<Store<T>>,
    refreshing: Mutex<HashSet<String>>,
    counters: Counters,
    shutdown: CancellationToken,
}

impl<T: Clone> CacheInner<T> {
    fn insert(&self, key: String, data: T, ttl: Duration) {
        self.insert_since(key, data, ttl, None);
    }

    fn epoch(&self) -> u64 {
        self.store.lock().epoch
    }

    /// Store `data` unless the cache was invalidated after `since` was read.
    /// Returns whether the value was stored.
    fn insert_since(&self, key: String, data: T, ttl: Duration, since: Option<u64>) -> bool {
        let now = self.clock.now_ms();
        let expires_at_ms = now.saturating_add(ttl.as_millis() as u64);

        let evicted = {
            let mut store = self.store.lock();
            if since.is_some_and(|epoch| epoch != store.epoch) {
                drop(store);
                log_cache_operation(COMPONENT, "set", &key, "superseded", None);
                return false;
            }
            let evicted = if !store.entries.contains_key(&key)
                && store.entries.len() >= self.max_entries
            {
                store.evict_oldest()
            } else {
                None
            };

            let seq = store.next_seq;
            store.next_seq += 1;
            store.entries.insert(
                key.clone(),
                CacheEntry {
                    data,
                    inserted_at_ms: now,
                    expires_at_ms,
                    seq,
                },
            );
            evicted
        };

        if let Some(evicted) = evicted {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            log_cache_operation(COMPONENT, "evict", &evicted, "capacity", None);
        }
        log_cache_operation(COMPONENT, "set", &key, "stored", None);
        true
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut store = self.store.lock();
        let before = store.entries.len();
        store.entries.retain(|_, entry| entry.is_fresh(now));
        before - store.entries.len()
    }
}

/// Keyed TTL cache for query results.
///
/// Cloning shares the underlying store.
#[derive(Debug)]
pub struct ResultCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for ResultCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Lookup<T> {
    Fresh(T),
    Stale(T),
    Miss,
}

impl<T> ResultCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: &ResultCacheConfig) -> Self {
        Self::with_clock(name, config, SystemClock::shared())
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: &ResultCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        debug!(
            cache = %name,
            default_ttl_ms = config.default_ttl_ms,
            max_entries = config.max_entries,
            "Creating result cache"
        );

        Self {
            inner: Arc::new(CacheInner {
                name,
                default_ttl: config.default_ttl(),
                max_entries: config.max_entries.max(1),
                clock,
                store: Mutex::new(Store {
                    entries: HashMap::new(),
                    next_seq: 0,
                    epoch: 0,
                }),
                refreshing: Mutex::new(HashSet::new()),
                counters: Counters::default(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    fn lookup(&self, key: &str, allow_stale: bool) -> Lookup<T> {
        let now = self.inner.clock.now_ms();
        let store = self.inner.store.lock();
        match store.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Lookup::Fresh(entry.data.clone()),
            Some(entry) if allow_stale => Lookup::Stale(entry.data.clone()),
            _ => Lookup::Miss,
        }
    }

    /// Return the cached value for `key`, fetching and storing it when absent
    /// or expired. Fetch errors are returned to the caller and never cached.
    pub async fn get<F, Fut, E>(&self, key: &str, fetch: F, options: GetOptions) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let ttl = options.ttl.unwrap_or(self.inner.default_ttl);

        if !options.force_refresh {
            match self.lookup(key, options.stale_while_revalidate) {
                Lookup::Fresh(data) => {
                    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    log_cache_operation(COMPONENT, "get", key, "hit", None);
                    return Ok(data);
                }
                Lookup::Stale(data) => {
                    self.inner.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                    log_cache_operation(COMPONENT, "get", key, "stale", None);
                    self.spawn_refresh(key, fetch, ttl);
                    return Ok(data);
                }
                Lookup::Miss => {}
            }
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        log_cache_operation(
            COMPONENT,
            "get",
            key,
            if options.force_refresh { "forced" } else { "miss" },
            None,
        );

        let epoch = self.inner.epoch();
        let data = fetch().await?;
        self.inner
            .insert_since(key.to_string(), data.clone(), ttl, Some(epoch));
        Ok(data)
    }

    /// At most one background refresh per key; later stale hits piggyback on it.
    fn spawn_refresh<F, Fut, E>(&self, key: &str, fetch: F, ttl: Duration)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        if !self.inner.refreshing.lock().insert(key.to_string()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let shutdown = self.inner.shutdown.clone();
        let epoch = self.inner.epoch();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(cache = %inner.name, key = %key, "Background refresh cancelled");
                }
                result = fetch() => match result {
                    Ok(data) => {
                        if inner.insert_since(key.clone(), data, ttl, Some(epoch)) {
                            inner.counters.background_refreshes.fetch_add(1, Ordering::Relaxed);
                        } else {
                            debug!(
                                cache = %inner.name,
                                key = %key,
                                "Dropping refresh that raced an invalidation"
                            );
                        }
                    }
                    Err(error) => {
                        inner.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            cache = %inner.name,
                            key = %key,
                            error = %error,
                            "Background refresh failed; keeping stale entry"
                        );
                    }
                }
            }
            inner.refreshing.lock().remove(&key);
        });
    }

    /// Fresh value for `key` without fetching
    pub fn peek(&self, key: &str) -> Option<T> {
        match self.lookup(key, false) {
            Lookup::Fresh(data) => Some(data),
            _ => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, data: T, ttl: Duration) {
        self.inner.insert(key.into(), data, ttl);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = {
            let mut store = self.inner.store.lock();
            store.epoch += 1;
            store.entries.remove(key).is_some()
        };
        if removed {
            log_cache_operation(COMPONENT, "invalidate", key, "removed", None);
        }
        removed
    }

    /// Remove every entry whose key matches `pattern`; returns the count removed
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let removed = {
            let mut store = self.inner.store.lock();
            store.epoch += 1;
            let before = store.entries.len();
            store.entries.retain(|key, _| !pattern.is_match(key));
            before - store.entries.len()
        };
        debug!(
            cache = %self.inner.name,
            pattern = %pattern.as_str(),
            removed = removed,
            "Invalidated cache entries by pattern"
        );
        removed
    }

    pub fn clear(&self) {
        {
            let mut store = self.inner.store.lock();
            store.epoch += 1;
            store.entries.clear();
        }
        info!(cache = %self.inner.name, "Cleared result cache");
    }

    pub fn len(&self) -> usize {
        self.inner.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; returns the count removed
    pub fn sweep(&self) -> usize {
        let removed = self.inner.sweep();
        if removed > 0 {
            debug!(cache = %self.inner.name, removed = removed, "Swept expired cache entries");
        }
        removed
    }

    /// Periodic sweep that stops on its own once the cache is dropped
    pub fn start_sweeper(&self, interval: Duration) -> ScheduledTask {
        let weak: Weak<CacheInner<T>> = Arc::downgrade(&self.inner);
        ScheduledTask::every(format!("{}-sweeper", self.inner.name), interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.sweep();
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            entries: self.len(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            stale_hits: counters.stale_hits.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            background_refreshes: counters.background_refreshes.load(Ordering::Relaxed),
            refresh_failures: counters.refresh_failures.load(Ordering::Relaxed),
        }
    }

    /// Cancel in-flight background refreshes. Lookups keep working.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        info!(cache = %self.inner.name, "Result cache shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn cache_with(clock: Arc<ManualClock>, ttl_ms: u64, max_entries: usize) -> ResultCache<String> {
        let config = ResultCacheConfig {
            default_ttl_ms: ttl_ms,
            max_entries,
            sweep_interval_ms: 1000,
        };
        ResultCache::with_clock("test", &config, clock)
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl FnOnce() -> std::future::Ready<Result<String, String>> + Send + 'static {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    #[tokio::test]
    async fn test_hit_before_expiry_and_miss_after() {
        let clock = ManualClock::new(0);
        let cache = cache_with(clock.clone(), 100, 10);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.set("x", "v1".to_string(), Duration::from_millis(100));

        clock.set(50);
        let value = cache
            .get("x", counting_fetch(&calls, "v2"), GetOptions::default())
            .await
            .unwrap();
        assert_eq!(value, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        clock.set(150);
        let value = cache
            .get("x", counting_fetch(&calls, "v2"), GetOptions::default())
            .await
            .unwrap();
        assert_eq!(value, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entry_expires_exactly_at_ttl() {
        let clock = ManualClock::new(1_000);
        let cache = cache_with(clock.clone(), 100, 10);
        cache.set("k", "v".to_string(), Duration::from_millis(100));

        clock.set(1_099);
        assert_eq!(cache.peek("k").as_deref(), Some("v"));
        clock.set(1_100);
        assert_eq!(cache.peek("k"), None);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let clock = ManualClock::new(0);
        let cache = cache_with(clock, 100, 10);

        let result: Result<String, String> = cache
            .get(
                "k",
                || async { Err("boom".to_string()) },
                GetOptions::default(),
            )
            .await;
        assert_eq!(result.unwrap_err(), "boom");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_entry() {
        let clock = ManualClock::new(0);
        let cache = cache_with(clock, 1_000, 10);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.set("k", "old".to_string(), Duration::from_secs(1));
        let value = cache
            .get(
                "k",
                counting_fetch(&calls, "new"),
                GetOptions::default().force_refresh(),
            )
            .await
            .unwrap();
        assert_eq!(value, "new");
        assert_eq!(cache.peek("k").as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_insertion() {
        let clock = ManualClock::new(0);
        let cache = cache_with(clock, 10_000, 2);

        cache.set("a", "1".to_string(), Duration::from_secs(10));
        cache.set("b", "2".to_string(), Duration::from_secs(10));
        cache.set("c", "3".to_string(), Duration::from_secs(10));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("a"), None);
        assert!(cache.peek("b").is_some());
        assert!(cache.peek("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_replacing_key_at_capacity_does_not_evict() {
        let clock = ManualClock::new(0);
        let cache = cache_with(clock, 10_000, 2);

        cache.set("a", "1".to_string(), Duration::from_secs(10));
        cache.set("b", "2".to_string(), Duration::from_secs(10));
        cache.set("a", "1b".to_string(), Duration::from_secs(10));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("a").as_deref(), Some("1b"));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_stale_then_refreshes() {
        let clock = ManualClock::new(0);
        let cache = cache_with(clock.clone(), 100, 10);
        cache.set("k", "stale".to_string(), Duration::from_millis(100));
        clock.set(200);

        let value = cache
            .get(
                "k",
                || async { Ok::<_, String>("fresh".to_string()) },
                GetOptions::default().stale_while_revalidate(),
            )
            .await
            .unwrap();
        assert_eq!(value, "stale");

        for _ in 0..50 {
            if cache.peek("k").is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.peek("k").as_deref(), Some("fresh"));
        let stats = cache.stats();
        assert_eq!(stats.stale_hits, 1);
        assert_eq!(stats.background_refreshes, 1);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_removes_matching_keys() {
        let clock = ManualClock::new(0);
        let cache = cache_with(clock, 10_000, 10);
        for key in ["products:B1", "products:B2", "customers:B1"] {
            cache.set(key, key.to_string(), Duration::from_secs(10));
        }

        let pattern = Regex::new("^products:").unwrap();
        assert_eq!(cache.invalidate_pattern(&pattern), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("customers:B1").is_some());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let clock = ManualClock::new(0);
        let cache = cache_with(clock.clone(), 10_000, 10);
        cache.set("short", "s".to_string(), Duration::from_millis(10));
        cache.set("long", "l".to_string(), Duration::from_secs(10));

        clock.set(20);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.peek("long").is_some());
    }
}
