//! Middleware Configuration Management
//!
//! Environment-specific settings for every component of the query middleware.
//! Production, development and test profiles differ mainly in TTLs and sweep
//! intervals; individual values can be overridden through `POS_QUERY_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use super::error::{ConfigResult, ConfigurationError};
use crate::constants;
use crate::monitoring::Thresholds;

/// Root configuration for the middleware stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub admission: AdmissionConfig,
    pub deduplication: DeduplicationConfig,
    pub result_cache: ResultCacheConfig,
    pub branch_config: BranchConfigCacheConfig,
    pub monitor: MonitorConfig,
}

/// Admission controller limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub max_concurrent: usize,
    /// `None` leaves the wait queue unbounded
    pub max_queue_depth: Option<usize>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: constants::admission::DEFAULT_MAX_CONCURRENT,
            max_queue_depth: None,
        }
    }
}

/// Request deduplication windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    pub default_ttl_ms: u64,
    pub max_age_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: constants::deduplication::DEFAULT_TTL_MS,
            max_age_ms: constants::deduplication::DEFAULT_MAX_AGE_MS,
            sweep_interval_ms: constants::deduplication::DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl DeduplicationConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// General result cache sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultCacheConfig {
    pub default_ttl_ms: u64,
    pub max_entries: usize,
    pub sweep_interval_ms: u64,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: constants::result_cache::DEFAULT_TTL_MS,
            max_entries: constants::result_cache::DEFAULT_MAX_ENTRIES,
            sweep_interval_ms: constants::result_cache::DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl ResultCacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Cache of per-branch sharing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchConfigCacheConfig {
    pub ttl_ms: u64,
    pub max_entries: usize,
}

impl Default for BranchConfigCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: constants::isolation::DEFAULT_CONFIG_TTL_MS,
            max_entries: constants::isolation::DEFAULT_CONFIG_MAX_ENTRIES,
        }
    }
}

impl BranchConfigCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Settings for the [`ResultCache`](crate::cache::ResultCache) backing the resolver
    pub fn as_result_cache_config(&self) -> ResultCacheConfig {
        ResultCacheConfig {
            default_ttl_ms: self.ttl_ms,
            max_entries: self.max_entries,
            ..ResultCacheConfig::default()
        }
    }
}

/// Performance monitor thresholds and retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub warning_ms: u64,
    pub critical_ms: u64,
    pub max_metrics: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            warning_ms: constants::monitor::DEFAULT_WARNING_MS,
            critical_ms: constants::monitor::DEFAULT_CRITICAL_MS,
            max_metrics: constants::monitor::DEFAULT_MAX_METRICS,
        }
    }
}

impl MonitorConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.warning_ms, self.critical_ms)
    }
}

impl MiddlewareConfig {
    /// Create test-optimized configuration with rapid invalidation
    pub fn for_test() -> Self {
        Self {
            admission: AdmissionConfig {
                max_concurrent: 4,
                max_queue_depth: None,
            },
            deduplication: DeduplicationConfig {
                default_ttl_ms: 100,
                max_age_ms: 1_000,
                sweep_interval_ms: 500,
            },
            result_cache: ResultCacheConfig {
                default_ttl_ms: 1_000,
                max_entries: 50,
                sweep_interval_ms: 500,
            },
            branch_config: BranchConfigCacheConfig {
                ttl_ms: 1_000,
                max_entries: 20,
            },
            monitor: MonitorConfig {
                warning_ms: 100,
                critical_ms: 500,
                max_metrics: 200,
            },
        }
    }

    /// Create development-optimized configuration
    pub fn for_development() -> Self {
        Self {
            deduplication: DeduplicationConfig {
                default_ttl_ms: 1_000,
                max_age_ms: 30_000,
                sweep_interval_ms: 10_000,
            },
            result_cache: ResultCacheConfig {
                default_ttl_ms: 60_000,
                max_entries: 200,
                sweep_interval_ms: 30_000,
            },
            branch_config: BranchConfigCacheConfig {
                ttl_ms: 10_000,
                max_entries: 50,
            },
            ..Self::default()
        }
    }

    /// Detect the running environment from the usual variables
    pub fn detect_environment() -> String {
        constants::env::ENVIRONMENT_VARS
            .iter()
            .find_map(|name| env::var(name).ok())
            .unwrap_or_else(|| "production".to_string())
    }

    /// Load the profile for the detected environment, then apply overrides
    pub fn from_environment() -> Self {
        let environment = Self::detect_environment();

        let config = match environment.as_str() {
            "test" => {
                info!("Loading test middleware configuration (rapid invalidation)");
                Self::for_test()
            }
            "development" => {
                info!("Loading development middleware configuration");
                Self::for_development()
            }
            _ => {
                info!("Loading production middleware configuration");
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    /// Apply `POS_QUERY_*` environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(max) = env_override::<usize>("POS_QUERY_MAX_CONCURRENT") {
            self.admission.max_concurrent = max;
            info!("Admission max concurrent override: {}", max);
        }

        if let Some(depth) = env_override::<usize>("POS_QUERY_MAX_QUEUE_DEPTH") {
            self.admission.max_queue_depth = Some(depth);
            info!("Admission max queue depth override: {}", depth);
        }

        if let Some(ttl) = env_override::<u64>("POS_QUERY_DEDUP_TTL_MS") {
            self.deduplication.default_ttl_ms = ttl;
            info!("Deduplication TTL override: {}ms", ttl);
        }

        if let Some(age) = env_override::<u64>("POS_QUERY_DEDUP_MAX_AGE_MS") {
            self.deduplication.max_age_ms = age;
            info!("Deduplication max age override: {}ms", age);
        }

        if let Some(ttl) = env_override::<u64>("POS_QUERY_CACHE_TTL_MS") {
            self.result_cache.default_ttl_ms = ttl;
            info!("Result cache TTL override: {}ms", ttl);
        }

        if let Some(max) = env_override::<usize>("POS_QUERY_CACHE_MAX_ENTRIES") {
            self.result_cache.max_entries = max;
            info!("Result cache max entries override: {}", max);
        }

        if let Some(ttl) = env_override::<u64>("POS_QUERY_BRANCH_CONFIG_TTL_MS") {
            self.branch_config.ttl_ms = ttl;
            info!("Branch config cache TTL override: {}ms", ttl);
        }

        if let Some(warning) = env_override::<u64>("POS_QUERY_MONITOR_WARNING_MS") {
            self.monitor.warning_ms = warning;
            info!("Monitor warning threshold override: {}ms", warning);
        }

        if let Some(critical) = env_override::<u64>("POS_QUERY_MONITOR_CRITICAL_MS") {
            self.monitor.critical_ms = critical;
            info!("Monitor critical threshold override: {}ms", critical);
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.admission.max_concurrent == 0 {
            return Err(ConfigurationError::invalid(
                "admission.max_concurrent",
                "must be greater than 0",
            ));
        }

        if self.admission.max_queue_depth == Some(0) {
            return Err(ConfigurationError::invalid(
                "admission.max_queue_depth",
                "must be greater than 0 when set",
            ));
        }

        if self.deduplication.sweep_interval_ms == 0 || self.result_cache.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid(
                "sweep_interval_ms",
                "sweep intervals must be greater than 0",
            ));
        }

        if self.monitor.warning_ms >= self.monitor.critical_ms {
            return Err(ConfigurationError::invalid(
                "monitor.warning_ms",
                format!(
                    "warning threshold ({}ms) must be below critical threshold ({}ms)",
                    self.monitor.warning_ms, self.monitor.critical_ms
                ),
            ));
        }

        if self.monitor.max_metrics == 0 {
            return Err(ConfigurationError::invalid(
                "monitor.max_metrics",
                "must be greater than 0",
            ));
        }

        if self.deduplication.default_ttl_ms == 0 {
            warn!("Deduplication TTL is 0 - only in-flight coalescing will apply");
        }

        if self.result_cache.max_entries == 0 {
            warn!("Result cache max entries is 0 - caching effectively disabled");
        }

        if self.branch_config.ttl_ms == 0 {
            warn!("Branch config TTL is 0 - settings will be fetched on every scoped query");
        }

        Ok(())
    }

    /// Log current configuration for debugging
    pub fn log_configuration(&self) {
        info!("Query Middleware Configuration:");
        info!(
            "  Admission: {} concurrent, queue depth {}",
            self.admission.max_concurrent,
            self.admission
                .max_queue_depth
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        );
        info!(
            "  Deduplication: {}ms TTL, {}ms max age, sweep every {}ms",
            self.deduplication.default_ttl_ms,
            self.deduplication.max_age_ms,
            self.deduplication.sweep_interval_ms
        );
        info!(
            "  Result Cache: {}ms TTL, {} max entries",
            self.result_cache.default_ttl_ms, self.result_cache.max_entries
        );
        info!(
            "  Branch Config: {}ms TTL, {} max entries",
            self.branch_config.ttl_ms, self.branch_config.max_entries
        );
        info!(
            "  Monitor: warning {}ms, critical {}ms, {} retained metrics",
            self.monitor.warning_ms, self.monitor.critical_ms, self.monitor.max_metrics
        );
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable override");
            None
        }
    }
}
