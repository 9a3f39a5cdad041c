//! Request deduplication.
//!
//! Concurrent queries for the same key share one execution. Each execution is
//! driven by its own spawned task, so the pending and cache bookkeeping runs
//! to completion even when every caller has stopped waiting.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::config::DeduplicationConfig;
use crate::error::TimeoutError;
use crate::logging::log_cache_operation;
use crate::utils::{Clock, ScheduledTask, SystemClock};

const COMPONENT: &str = "request_deduplicator";

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

#[derive(Debug, Clone)]
struct CachedResult<T> {
    data: T,
    inserted_at_ms: u64,
}

struct PendingRequest<T, E> {
    future: SharedResult<T, E>,
    started_at_ms: u64,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupStats {
    pub cached: usize,
    pub pending: usize,
    pub executions: u64,
    pub coalesced: u64,
    pub cache_hits: u64,
    pub orphaned: u64,
}

struct DedupInner<T, E> {
    name: String,
    default_ttl: Duration,
    max_age: Duration,
    clock: Arc<dyn Clock>,
    cache: DashMap<String, CachedResult<T>>,
    pending: DashMap<String, PendingRequest<T, E>>,
    next_generation: AtomicU64,
    executions: AtomicU64,
    coalesced: AtomicU64,
    cache_hits: AtomicU64,
    orphaned: AtomicU64,
}

impl<T: Clone, E> DedupInner<T, E> {
    /// Called by the driving task once the execution settles. Only the
    /// execution that still owns the pending slot may publish its result.
    fn settle(&self, key: &str, generation: u64, result: &Result<T, E>) {
        let owned = self
            .pending
            .remove_if(key, |_, pending| pending.generation == generation)
            .is_some();

        if !owned {
            self.orphaned.fetch_add(1, Ordering::Relaxed);
            debug!(
                deduplicator = %self.name,
                key = %key,
                generation = generation,
                "Discarding result of abandoned execution"
            );
            return;
        }

        if let Ok(data) = result {
            self.cache.insert(
                key.to_string(),
                CachedResult {
                    data: data.clone(),
                    inserted_at_ms: self.clock.now_ms(),
                },
            );
        }
    }

    fn release(&self, key: &str, generation: u64) {
        if self
            .pending
            .remove_if(key, |_, pending| pending.generation == generation)
            .is_some()
        {
            warn!(
                deduplicator = %self.name,
                key = %key,
                generation = generation,
                "Execution panicked; released pending slot"
            );
        }
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let max_age_ms = self.max_age.as_millis() as u64;
        let before = self.cache.len();
        self.cache
            .retain(|_, cached| now.saturating_sub(cached.inserted_at_ms) < max_age_ms);
        before.saturating_sub(self.cache.len())
    }
}

enum Lookup<T, E> {
    Cached(T),
    Joined {
        future: SharedResult<T, E>,
        generation: u64,
    },
    Started {
        future: SharedResult<T, E>,
        generation: u64,
    },
}

/// Coalesces concurrent identical queries onto a single execution and keeps
/// successful results for a short TTL.
pub struct RequestDeduplicator<T, E> {
    inner: Arc<DedupInner<T, E>>,
}

impl<T, E> Clone for RequestDeduplicator<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> std::fmt::Debug for RequestDeduplicator<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("name", &self.inner.name)
            .field("cached", &self.inner.cache.len())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: &DeduplicationConfig) -> Self {
        Self::with_clock(name, config, SystemClock::shared())
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: &DeduplicationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(DedupInner {
                name: name.into(),
                default_ttl: config.default_ttl(),
                max_age: Duration::from_millis(config.max_age_ms),
                clock,
                cache: DashMap::new(),
                pending: DashMap::new(),
                next_generation: AtomicU64::new(0),
                executions: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
                orphaned: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run `fetch` for `key` unless an identical request is in flight or a
    /// result younger than the default TTL is cached.
    pub async fn query<F, Fut>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.query_with_ttl(key, fetch, self.inner.default_ttl).await
    }

    pub async fn query_with_ttl<F, Fut>(&self, key: &str, fetch: F, ttl: Duration) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        match self.lookup_or_start(key, fetch, Some(ttl)) {
            Lookup::Cached(data) => Ok(data),
            Lookup::Joined { future, .. } | Lookup::Started { future, .. } => future.await,
        }
    }

    /// Ignore the short-lived cache but still join an in-flight execution
    pub async fn query_fresh<F, Fut>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        match self.lookup_or_start(key, fetch, None) {
            Lookup::Cached(data) => Ok(data),
            Lookup::Joined { future, .. } | Lookup::Started { future, .. } => future.await,
        }
    }

    /// Like [`query_with_ttl`](Self::query_with_ttl), but gives up after `timeout`. On timeout
    /// the pending slot is released so the next caller starts a new execution;
    /// the abandoned one runs to completion and its result is discarded.
    pub async fn query_with_timeout<F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: From<TimeoutError>,
    {
        let (future, generation) = match self.lookup_or_start(key, fetch, Some(ttl)) {
            Lookup::Cached(data) => return Ok(data),
            Lookup::Joined { future, generation } | Lookup::Started { future, generation } => {
                (future, generation)
            }
        };

        match tokio::time::timeout(timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                let released = self
                    .inner
                    .pending
                    .remove_if(key, |_, pending| pending.generation == generation)
                    .is_some();
                warn!(
                    deduplicator = %self.inner.name,
                    key = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    released = released,
                    "Deduplicated request timed out"
                );
                Err(TimeoutError {
                    key: key.to_string(),
                    after: timeout,
                }
                .into())
            }
        }
    }

    /// All bookkeeping happens here, synchronously, so there is no await
    /// between checking for a pending request and registering a new one.
    fn lookup_or_start<F, Fut>(&self, key: &str, fetch: F, ttl: Option<Duration>) -> Lookup<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let now = self.inner.clock.now_ms();

        if let Some(ttl) = ttl {
            if let Some(cached) = self.inner.cache.get(key) {
                if now.saturating_sub(cached.inserted_at_ms) < ttl.as_millis() as u64 {
                    self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
                    log_cache_operation(COMPONENT, "query", key, "cache_hit", None);
                    return Lookup::Cached(cached.data.clone());
                }
            }
        }

        let lookup = match self.inner.pending.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                log_cache_operation(COMPONENT, "query", key, "coalesced", None);
                Lookup::Joined {
                    future: occupied.get().future.clone(),
                    generation: occupied.get().generation,
                }
            }
            Entry::Vacant(vacant) => {
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let work = fetch();
                let inner = Arc::clone(&self.inner);
                let owned_key = key.to_string();

                let future = async move {
                    match AssertUnwindSafe(work).catch_unwind().await {
                        Ok(result) => {
                            inner.settle(&owned_key, generation, &result);
                            result
                        }
                        Err(panic) => {
                            // Joined waiters still see the panic; new callers start over
                            inner.release(&owned_key, generation);
                            std::panic::resume_unwind(panic)
                        }
                    }
                }
                .boxed()
                .shared();

                vacant.insert(PendingRequest {
                    future: future.clone(),
                    started_at_ms: now,
                    generation,
                });
                Lookup::Started { future, generation }
            }
        };

        if let Lookup::Started { future, .. } = &lookup {
            self.inner.executions.fetch_add(1, Ordering::Relaxed);
            log_cache_operation(COMPONENT, "query", key, "executing", None);
            // The driver keeps polling after every waiter has gone away
            tokio::spawn(future.clone().map(|_| ()));
        }

        lookup
    }

    /// Milliseconds the in-flight execution for `key` has been running
    pub fn pending_age_ms(&self, key: &str) -> Option<u64> {
        let now = self.inner.clock.now_ms();
        self.inner
            .pending
            .get(key)
            .map(|pending| now.saturating_sub(pending.started_at_ms))
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.pending.contains_key(key)
    }

    /// Drop cached results for `key`, or all of them
    pub fn clear_cache(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.inner.cache.remove(key);
                log_cache_operation(COMPONENT, "clear", key, "removed", None);
            }
            None => {
                self.inner.cache.clear();
                info!(deduplicator = %self.inner.name, "Cleared deduplication cache");
            }
        }
    }

    /// Drop cached results whose key starts with `prefix`
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let before = self.inner.cache.len();
        self.inner.cache.retain(|key, _| !key.starts_with(prefix));
        before.saturating_sub(self.inner.cache.len())
    }

    /// Remove cached results older than the configured maximum age
    pub fn sweep(&self) -> usize {
        let removed = self.inner.sweep();
        if removed > 0 {
            debug!(deduplicator = %self.inner.name, removed = removed, "Swept aged results");
        }
        removed
    }

    pub fn start_sweeper(&self, interval: Duration) -> ScheduledTask {
        let weak: Weak<DedupInner<T, E>> = Arc::downgrade(&self.inner);
        ScheduledTask::every(format!("{}-sweeper", self.inner.name), interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.sweep();
            }
        })
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            cached: self.inner.cache.len(),
            pending: self.inner.pending.len(),
            executions: self.inner.executions.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            orphaned: self.inner.orphaned.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Failed(String),
        TimedOut,
    }

    impl From<TimeoutError> for TestError {
        fn from(_: TimeoutError) -> Self {
            TestError::TimedOut
        }
    }

    fn config(ttl_ms: u64) -> DeduplicationConfig {
        DeduplicationConfig {
            default_ttl_ms: ttl_ms,
            max_age_ms: 10_000,
            sweep_interval_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_one_execution() {
        let dedup: RequestDeduplicator<u32, TestError> =
            RequestDeduplicator::new("test", &config(1_000));
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |calls: Arc<AtomicUsize>| {
            let dedup = dedup.clone();
            async move {
                dedup
                    .query("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(7)
                    })
                    .await
            }
        };

        let (a, b, c) = tokio::join!(run(calls.clone()), run(calls.clone()), run(calls.clone()));
        assert_eq!((a, b, c), (Ok(7), Ok(7), Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.stats().coalesced, 2);
        assert!(!dedup.is_pending("k"));
    }

    #[tokio::test]
    async fn test_errors_fan_out_and_are_not_cached() {
        let dedup: RequestDeduplicator<u32, TestError> =
            RequestDeduplicator::new("test", &config(1_000));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let result = dedup
                .query("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(TestError::Failed("boom".into()))
                })
                .await;
            assert_eq!(result, Err(TestError::Failed("boom".into())));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dedup.stats().cached, 0);
        assert_eq!(dedup.stats().pending, 0);
    }

    async fn crashing_fetch() -> Result<u32, TestError> {
        panic!("connection handler crashed")
    }

    #[tokio::test]
    async fn test_panicking_fetch_releases_pending_slot() {
        let dedup: RequestDeduplicator<u32, TestError> =
            RequestDeduplicator::new("test", &config(1_000));

        let caller = dedup.clone();
        let crashed = tokio::spawn(async move { caller.query("k", crashing_fetch).await }).await;
        assert!(crashed.unwrap_err().is_panic());

        assert!(!dedup.is_pending("k"));
        assert_eq!(dedup.query("k", || async { Ok(2) }).await, Ok(2));
        assert_eq!(dedup.stats().cached, 1);
    }

    #[tokio::test]
    async fn test_cached_result_respects_ttl() {
        let clock = ManualClock::new(0);
        let dedup: RequestDeduplicator<u32, TestError> =
            RequestDeduplicator::with_clock("test", &config(100), clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: &Arc<AtomicUsize>| {
            let calls = calls.clone();
            move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) as u32) }
        };

        assert_eq!(dedup.query("k", fetch(&calls)).await, Ok(0));
        clock.set(99);
        assert_eq!(dedup.query("k", fetch(&calls)).await, Ok(0));
        clock.set(100);
        assert_eq!(dedup.query("k", fetch(&calls)).await, Ok(1));
        assert_eq!(dedup.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_query_fresh_skips_cache() {
        let dedup: RequestDeduplicator<u32, TestError> =
            RequestDeduplicator::new("test", &config(60_000));

        assert_eq!(dedup.query("k", || async { Ok(1) }).await, Ok(1));
        assert_eq!(dedup.query("k", || async { Ok(2) }).await, Ok(1));
        assert_eq!(dedup.query_fresh("k", || async { Ok(3) }).await, Ok(3));
        assert_eq!(dedup.query("k", || async { Ok(4) }).await, Ok(3));
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_stop_execution() {
        let dedup: RequestDeduplicator<u32, TestError> =
            RequestDeduplicator::new("test", &config(60_000));

        let waiter = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                dedup
                    .query("k", || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(5)
                    })
                    .await
            })
        };
        for _ in 0..20 {
            if dedup.is_pending("k") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(dedup.is_pending("k"));
        waiter.abort();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!dedup.is_pending("k"));
        assert_eq!(dedup.query("k", || async { Ok(9) }).await, Ok(5));
    }

    #[tokio::test]
    async fn test_timeout_releases_slot_and_discards_orphan() {
        let dedup: RequestDeduplicator<u32, TestError> =
            RequestDeduplicator::new("test", &config(60_000));

        let result = dedup
            .query_with_timeout(
                "k",
                || async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(1)
                },
                Duration::from_secs(60),
                Duration::from_millis(10),
            )
            .await;
        assert_eq!(result, Err(TestError::TimedOut));
        assert!(!dedup.is_pending("k"));

        let second = dedup
            .query("k", || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(2)
            });
        assert_eq!(second.await, Ok(2));

        // The orphan finished while the second execution was running and must not have published
        assert_eq!(dedup.query("k", || async { Ok(3) }).await, Ok(2));
        assert_eq!(dedup.stats().orphaned, 1);
    }

    #[tokio::test]
    async fn test_released_execution_never_publishes() {
        let dedup: RequestDeduplicator<u32, TestError> =
            RequestDeduplicator::new("test", &config(60_000));
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let result = dedup
            .query_with_timeout(
                "k",
                move || async move {
                    let _ = gate.await;
                    Ok(1)
                },
                Duration::from_secs(60),
                Duration::from_millis(5),
            )
            .await;
        assert_eq!(result, Err(TestError::TimedOut));

        release.send(()).unwrap();
        for _ in 0..20 {
            if dedup.stats().orphaned == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let stats = dedup.stats();
        assert_eq!(stats.orphaned, 1);
        assert_eq!(stats.cached, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_sweep_drops_results_past_max_age() {
        let clock = ManualClock::new(0);
        let dedup: RequestDeduplicator<u32, TestError> = RequestDeduplicator::with_clock(
            "test",
            &DeduplicationConfig {
                default_ttl_ms: 100,
                max_age_ms: 500,
                sweep_interval_ms: 1_000,
            },
            clock.clone(),
        );

        dedup.query("a", || async { Ok(1) }).await.unwrap();
        clock.set(300);
        dedup.query("b", || async { Ok(2) }).await.unwrap();
        clock.set(600);

        assert_eq!(dedup.sweep(), 1);
        assert_eq!(dedup.stats().cached, 1);
    }
}
