//! # Query Middleware
//!
//! Composition root. One [`QueryMiddleware`] owns an instance of every
//! component, built from a single [`MiddlewareConfig`], and runs reads
//! through them in a fixed order:
//!
//! ```text
//! resolve branch policy -> scope query -> dedup (key = scoped spec)
//!     -> admission (priority) -> monitor -> executor
//! ```
//!
//! Because the dedup key is taken from the already-scoped spec, two tenants
//! whose reads scope differently never share a result.

use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::cache::{CacheStats, DedupStats, GetOptions, RequestDeduplicator, ResultCache};
use crate::config::MiddlewareConfig;
use crate::database::QueryExecutor;
use crate::error::{QueryError, Result};
use crate::isolation::{
    scope_query, stamp_on_create, BranchConfigResolver, BranchSettingsSource, EntityType,
    TenantContext,
};
use crate::logging::log_error;
use crate::monitoring::PerformanceMonitor;
use crate::query_builder::QuerySpec;
use crate::resilience::{AdmissionController, AdmissionStatus};
use crate::utils::{Clock, ScheduledTask, SystemClock};

/// Result rows shared between every caller coalesced onto one execution
pub type Rows = Arc<Vec<Value>>;

pub const DEFAULT_PRIORITY: i32 = 0;

#[derive(Debug, Clone)]
pub struct MiddlewareStatus {
    pub admission: AdmissionStatus,
    pub deduplication: DedupStats,
    pub result_cache: CacheStats,
    pub branch_config_cache: CacheStats,
}

pub struct QueryMiddleware {
    config: MiddlewareConfig,
    executor: Arc<dyn QueryExecutor>,
    admission: AdmissionController,
    dedup: RequestDeduplicator<Rows, QueryError>,
    results: ResultCache<Rows>,
    branch_config: BranchConfigResolver,
    monitor: Arc<PerformanceMonitor>,
    sweepers: Mutex<Vec<ScheduledTask>>,
}

impl std::fmt::Debug for QueryMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryMiddleware")
            .field("admission", &self.admission)
            .field("dedup", &self.dedup)
            .field("branch_config", &self.branch_config)
            .finish()
    }
}

impl QueryMiddleware {
    pub fn new(
        config: MiddlewareConfig,
        executor: Arc<dyn QueryExecutor>,
        settings: Arc<dyn BranchSettingsSource>,
    ) -> Self {
        Self::with_clock(config, executor, settings, SystemClock::shared())
    }

    pub fn with_clock(
        config: MiddlewareConfig,
        executor: Arc<dyn QueryExecutor>,
        settings: Arc<dyn BranchSettingsSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        config.log_configuration();

        Self {
            admission: AdmissionController::from_config("database_operations", &config.admission),
            dedup: RequestDeduplicator::with_clock(
                "query_dedup",
                &config.deduplication,
                Arc::clone(&clock),
            ),
            results: ResultCache::with_clock("query_results", &config.result_cache, Arc::clone(&clock)),
            branch_config: BranchConfigResolver::with_clock(settings, &config.branch_config, clock),
            monitor: Arc::new(PerformanceMonitor::new(&config.monitor)),
            executor,
            sweepers: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Start the periodic dedup and result-cache sweeps. Must be called from
    /// inside a tokio runtime; calling it again is a no-op.
    pub fn start_sweepers(&self) {
        let mut sweepers = self.sweepers.lock();
        if !sweepers.is_empty() {
            return;
        }
        sweepers.push(self.dedup.start_sweeper(self.config.deduplication.sweep_interval()));
        sweepers.push(self.results.start_sweeper(self.config.result_cache.sweep_interval()));
        debug!(count = sweepers.len(), "Started cache sweepers");
    }

    pub fn config(&self) -> &MiddlewareConfig {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn branch_config(&self) -> &BranchConfigResolver {
        &self.branch_config
    }

    /// Apply the tenant's branch policy to `spec` without running it
    pub async fn scope(&self, tenant: &TenantContext, spec: QuerySpec) -> QuerySpec {
        let policy = self.branch_config.resolve(tenant).await;
        scope_query(spec, tenant, policy.as_ref())
    }

    /// Scoped, deduplicated, admitted and monitored read at default priority
    pub async fn fetch_scoped(&self, tenant: &TenantContext, spec: QuerySpec) -> Result<Rows> {
        self.fetch_scoped_with_priority(tenant, spec, DEFAULT_PRIORITY)
            .await
    }

    pub async fn fetch_scoped_with_priority(
        &self,
        tenant: &TenantContext,
        spec: QuerySpec,
        priority: i32,
    ) -> Result<Rows> {
        let scoped = self.scope(tenant, spec).await;
        let key = scoped.cache_key();
        let run = self.execution(scoped, priority);
        self.dedup.query(&key, run).await
    }

    /// Like [`fetch_scoped`](Self::fetch_scoped) with a long-lived result
    /// cache in front of deduplication
    pub async fn fetch_cached(
        &self,
        tenant: &TenantContext,
        spec: QuerySpec,
        options: GetOptions,
    ) -> Result<Rows> {
        let scoped = self.scope(tenant, spec).await;
        let key = scoped.cache_key();
        let dedup = self.dedup.clone();
        let run = self.execution(scoped, DEFAULT_PRIORITY);
        let dedup_key = key.clone();

        self.results
            .get(
                &key,
                move || async move { dedup.query(&dedup_key, run).await },
                options,
            )
            .await
    }

    /// The admitted, monitored executor call for an already-scoped spec
    fn execution(
        &self,
        scoped: QuerySpec,
        priority: i32,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<Rows>> + Send + 'static {
        let admission = self.admission.clone();
        let monitor = Arc::clone(&self.monitor);
        let executor = Arc::clone(&self.executor);
        let thresholds = monitor.default_thresholds();

        move || {
            Box::pin(async move {
                let operation = format!("fetch:{}", scoped.entity());
                let rows = admission
                    .execute(
                        || monitor.track(&operation, || executor.fetch(&scoped), thresholds),
                        priority,
                    )
                    .await?;
                Ok(Arc::new(rows))
            })
        }
    }

    /// Stamp ownership on `row`, insert it, and drop cached reads of the entity
    pub async fn create_scoped(
        &self,
        entity: &EntityType,
        tenant: &TenantContext,
        row: Map<String, Value>,
    ) -> Result<Value> {
        let policy = self.branch_config.resolve(tenant).await;
        let row = stamp_on_create(entity, tenant, policy.as_ref(), row);
        let operation = format!("insert:{entity}");
        let thresholds = self.monitor.default_thresholds();

        let stored = self
            .admission
            .execute(
                || {
                    self.monitor
                        .track(&operation, || self.executor.insert(entity, row), thresholds)
                },
                DEFAULT_PRIORITY,
            )
            .await
            .map_err(|e| {
                let error = QueryError::from(e);
                log_error(
                    "query_middleware",
                    "create_scoped",
                    &error.to_string(),
                    tenant.branch_id(),
                );
                error
            })?;

        self.invalidate_entity(entity);
        Ok(stored)
    }

    /// Forget every cached read of `entity`, across all tenants
    pub fn invalidate_entity(&self, entity: &EntityType) {
        let prefix = format!("{}?", entity.as_str());
        let dedup_removed = self.dedup.clear_prefix(&prefix);
        let cache_removed = match Regex::new(&format!("^{}", regex::escape(&prefix))) {
            Ok(pattern) => self.results.invalidate_pattern(&pattern),
            Err(_) => 0,
        };
        debug!(
            entity_type = %entity,
            dedup_removed = dedup_removed,
            cache_removed = cache_removed,
            "Invalidated cached reads"
        );
    }

    pub fn status(&self) -> MiddlewareStatus {
        MiddlewareStatus {
            admission: self.admission.status(),
            deduplication: self.dedup.stats(),
            result_cache: self.results.stats(),
            branch_config_cache: self.branch_config.cache_stats(),
        }
    }

    /// Stop sweepers and background refreshes and cancel queued operations.
    /// Operations already running finish normally.
    pub async fn shutdown(&self) {
        let sweepers: Vec<ScheduledTask> = self.sweepers.lock().drain(..).collect();
        for sweeper in sweepers {
            sweeper.shutdown().await;
        }
        self.results.shutdown();
        self.branch_config.shutdown();
        let cancelled = self.admission.clear_queue();
        info!(cancelled_queued = cancelled, "Query middleware shut down");
    }
}
