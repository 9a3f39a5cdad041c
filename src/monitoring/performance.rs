//! Operation timing with a bounded history.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::MonitorConfig;
use crate::constants::monitor;

/// Duration limits, in milliseconds, above which an operation is logged as
/// slow (warning) or very slow (critical)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning_ms: u64,
    pub critical_ms: u64,
}

impl Thresholds {
    pub fn new(warning_ms: u64, critical_ms: u64) -> Self {
        Self {
            warning_ms,
            critical_ms,
        }
    }

    pub fn classify(&self, duration_ms: f64) -> Severity {
        if duration_ms >= self.critical_ms as f64 {
            Severity::Critical
        } else if duration_ms >= self.warning_ms as f64 {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(monitor::DEFAULT_WARNING_MS, monitor::DEFAULT_CRITICAL_MS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub failed: bool,
}

/// Aggregates over the retained metrics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub count: usize,
    pub failed: usize,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl PerformanceStats {
    fn from_durations(mut durations: Vec<f64>, failed: usize) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        durations.sort_by(f64::total_cmp);

        let count = durations.len();
        let sum: f64 = durations.iter().sum();
        Some(Self {
            count,
            failed,
            average_ms: sum / count as f64,
            min_ms: durations[0],
            max_ms: durations[count - 1],
            p50_ms: percentile(&durations, 50.0),
            p95_ms: percentile(&durations, 95.0),
            p99_ms: percentile(&durations, 99.0),
        })
    }
}

/// Nearest-rank percentile over an ascending, non-empty slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Times wrapped operations and keeps the most recent `max_metrics` results
#[derive(Debug)]
pub struct PerformanceMonitor {
    max_metrics: usize,
    default_thresholds: Thresholds,
    metrics: Mutex<VecDeque<PerformanceMetric>>,
}

impl PerformanceMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            max_metrics: config.max_metrics.max(1),
            default_thresholds: config.thresholds(),
            metrics: Mutex::new(VecDeque::with_capacity(config.max_metrics.min(4096))),
        }
    }

    pub fn default_thresholds(&self) -> Thresholds {
        self.default_thresholds
    }

    /// Time `op`, record the outcome and log it by severity. The operation's
    /// result, including its error, is returned unchanged.
    pub async fn track<F, Fut, T, E>(&self, name: &str, op: F, thresholds: Thresholds) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.track_with_metadata(name, HashMap::new(), op, thresholds)
            .await
    }

    pub async fn track_with_metadata<F, Fut, T, E>(
        &self,
        name: &str,
        metadata: HashMap<String, serde_json::Value>,
        op: F,
        thresholds: Thresholds,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        let result = op().await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => {
                let duration_ms = self.record(name, elapsed, false, metadata);
                match thresholds.classify(duration_ms) {
                    Severity::Normal => {
                        debug!(operation = %name, duration_ms = duration_ms, "Operation completed")
                    }
                    Severity::Warning => warn!(
                        operation = %name,
                        duration_ms = duration_ms,
                        warning_ms = thresholds.warning_ms,
                        "Slow operation"
                    ),
                    Severity::Critical => error!(
                        operation = %name,
                        duration_ms = duration_ms,
                        critical_ms = thresholds.critical_ms,
                        "Critically slow operation"
                    ),
                }
            }
            Err(e) => {
                let duration_ms = self.record(name, elapsed, true, metadata);
                error!(
                    operation = %name,
                    duration_ms = duration_ms,
                    error = %e,
                    "Operation failed"
                );
            }
        }

        result
    }

    /// Append a metric, dropping the oldest past capacity. Returns the duration in ms.
    pub fn record(
        &self,
        name: &str,
        elapsed: Duration,
        failed: bool,
        metadata: HashMap<String, serde_json::Value>,
    ) -> f64 {
        let duration_ms = elapsed.as_nanos() as f64 / 1_000_000.0;
        let mut metrics = self.metrics.lock();
        while metrics.len() >= self.max_metrics {
            metrics.pop_front();
        }
        metrics.push_back(PerformanceMetric {
            operation: name.to_string(),
            duration_ms,
            timestamp: Utc::now(),
            metadata,
            failed,
        });
        duration_ms
    }

    /// Stats for one operation name, or for everything retained
    pub fn get_stats(&self, operation: Option<&str>) -> Option<PerformanceStats> {
        let metrics = self.metrics.lock();
        let selected = metrics
            .iter()
            .filter(|m| operation.map_or(true, |name| m.operation == name));

        let mut durations = Vec::new();
        let mut failed = 0;
        for metric in selected {
            durations.push(metric.duration_ms);
            if metric.failed {
                failed += 1;
            }
        }
        drop(metrics);

        PerformanceStats::from_durations(durations, failed)
    }

    /// Retained metrics at or above `threshold_ms`, slowest first
    pub fn get_slow_operations(&self, threshold_ms: f64) -> Vec<PerformanceMetric> {
        let mut slow: Vec<PerformanceMetric> = self
            .metrics
            .lock()
            .iter()
            .filter(|m| m.duration_ms >= threshold_ms)
            .cloned()
            .collect();
        slow.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        slow
    }

    /// The last `n` metrics, oldest first
    pub fn get_recent_operations(&self, n: usize) -> Vec<PerformanceMetric> {
        let metrics = self.metrics.lock();
        let skip = metrics.len().saturating_sub(n);
        metrics.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.metrics.lock().clear();
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(&MonitorConfig::default())
    }
}
