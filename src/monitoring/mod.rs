//! # Performance Monitoring
//!
//! [`PerformanceMonitor::track`] wraps an async operation, times it, keeps the
//! measurement in a bounded ring buffer and logs it at debug, warn or error
//! depending on the [`Thresholds`] it crossed. Failures are recorded and
//! returned to the caller unchanged.

pub mod performance;

pub use performance::{PerformanceMetric, PerformanceMonitor, PerformanceStats, Severity, Thresholds};
