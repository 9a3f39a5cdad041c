use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{BranchSharingConfig, TenantContext};
use crate::cache::{CacheStats, GetOptions, ResultCache};
use crate::config::BranchConfigCacheConfig;
use crate::error::{QueryError, Result};
use crate::utils::{Clock, SystemClock};

/// Loads a branch's sharing policy from wherever branch settings live
#[async_trait]
pub trait BranchSettingsSource: Send + Sync {
    async fn get_branch_settings(&self, branch_id: &str) -> Result<BranchSharingConfig>;
}

/// Fixed in-memory settings, with optional per-branch failures
#[derive(Debug, Default)]
pub struct StaticBranchSettingsSource {
    branches: HashMap<String, BranchSharingConfig>,
    failures: HashMap<String, String>,
    lookups: AtomicUsize,
}

impl StaticBranchSettingsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(mut self, branch_id: impl Into<String>, config: BranchSharingConfig) -> Self {
        self.branches.insert(branch_id.into(), config);
        self
    }

    pub fn with_failure(mut self, branch_id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.insert(branch_id.into(), reason.into());
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BranchSettingsSource for StaticBranchSettingsSource {
    async fn get_branch_settings(&self, branch_id: &str) -> Result<BranchSharingConfig> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.failures.get(branch_id) {
            return Err(QueryError::ConfigurationUnavailable {
                branch_id: branch_id.to_string(),
                reason: reason.clone(),
            });
        }
        self.branches
            .get(branch_id)
            .cloned()
            .ok_or_else(|| QueryError::ConfigurationUnavailable {
                branch_id: branch_id.to_string(),
                reason: "no settings row for branch".to_string(),
            })
    }
}

/// Resolves the sharing policy for a tenant through a short-TTL cache.
///
/// Lookup failures are not cached and come back as `None`, which the
/// isolation rules treat as "configuration unavailable".
pub struct BranchConfigResolver {
    source: Arc<dyn BranchSettingsSource>,
    cache: ResultCache<BranchSharingConfig>,
}

impl std::fmt::Debug for BranchConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchConfigResolver")
            .field("cache", &self.cache.name())
            .field("entries", &self.cache.len())
            .finish()
    }
}

impl BranchConfigResolver {
    pub fn new(source: Arc<dyn BranchSettingsSource>, config: &BranchConfigCacheConfig) -> Self {
        Self::with_clock(source, config, SystemClock::shared())
    }

    pub fn with_clock(
        source: Arc<dyn BranchSettingsSource>,
        config: &BranchConfigCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            cache: ResultCache::with_clock(
                "branch_sharing_config",
                &config.as_result_cache_config(),
                clock,
            ),
        }
    }

    pub async fn resolve(&self, tenant: &TenantContext) -> Option<BranchSharingConfig> {
        let branch_id = tenant.branch_id()?;
        let source = Arc::clone(&self.source);
        let owned_id = branch_id.to_string();

        let result = self
            .cache
            .get(
                branch_id,
                move || async move { source.get_branch_settings(&owned_id).await },
                GetOptions::default(),
            )
            .await;

        match result {
            Ok(config) => {
                debug!(branch_id = %branch_id, mode = %config.isolation_mode, "Resolved branch sharing config");
                Some(config)
            }
            Err(error) => {
                warn!(
                    branch_id = %branch_id,
                    error = %error,
                    "Failed to load branch sharing config"
                );
                None
            }
        }
    }

    /// Forget cached policy for one branch, or for all branches
    pub fn clear_branch_cache(&self, branch_id: Option<&str>) {
        match branch_id {
            Some(branch_id) => {
                self.cache.invalidate(branch_id);
            }
            None => self.cache.clear(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}
