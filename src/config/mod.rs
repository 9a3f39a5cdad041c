//! # Middleware Configuration System
//!
//! Typed configuration for the admission controller, request deduplicator,
//! result cache, branch-settings cache and performance monitor.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pos_query_core::config::{ConfigLoader, MiddlewareConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Profile for the detected environment plus POS_QUERY_* overrides
//! let config = MiddlewareConfig::from_environment();
//! config.validate()?;
//!
//! // Or layer a file over the profile
//! let loaded = ConfigLoader::load_from(Some("config/pos-query.toml"))?;
//! let max = loaded.config().admission.max_concurrent;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;
pub mod middleware_config;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;
pub use middleware_config::{
    AdmissionConfig, BranchConfigCacheConfig, DeduplicationConfig, MiddlewareConfig,
    MonitorConfig, ResultCacheConfig,
};
