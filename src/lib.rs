#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # POS Query Core
//!
//! Query-execution middleware for multi-branch point-of-sale backends.
//!
//! ## Overview
//!
//! Every read issued by the application passes through a small stack of
//! components that sit between business code and the database client:
//!
//! - **Admission control** caps concurrent database work at the connection
//!   budget and queues the rest by priority.
//! - **Request deduplication** collapses identical concurrent reads into one
//!   execution and keeps the result for about a second.
//! - **Result caching** keeps results for minutes, optionally serving stale
//!   values while refreshing in the background.
//! - **Branch isolation** scopes reads to the requesting branch according to
//!   that branch's sharing policy and stamps ownership on new rows.
//! - **Performance monitoring** times every operation and keeps percentiles.
//!
//! ## Module Organization
//!
//! - [`resilience`] - admission controller
//! - [`cache`] - request deduplicator and result cache
//! - [`isolation`] - tenant context, branch policy and scoping rules
//! - [`query_builder`] - immutable [`QuerySpec`] values
//! - [`database`] - PostgreSQL execution adapter
//! - [`monitoring`] - performance monitor
//! - [`middleware`] - composition root wiring the above together
//! - [`config`] - configuration profiles and loading
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pos_query_core::config::ConfigLoader;
//! use pos_query_core::database::{create_pool, PgBranchSettingsSource, PgQueryExecutor};
//! use pos_query_core::isolation::{EntityType, TenantContext};
//! use pos_query_core::middleware::QueryMiddleware;
//! use pos_query_core::query_builder::QuerySpec;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! pos_query_core::logging::init_structured_logging();
//! let loader = ConfigLoader::load()?;
//! let config = loader.config().clone();
//!
//! let pool = create_pool("postgresql://localhost/pos", &config.admission).await?;
//! let middleware = QueryMiddleware::new(
//!     config,
//!     Arc::new(PgQueryExecutor::new(pool.clone())),
//!     Arc::new(PgBranchSettingsSource::new(pool)),
//! );
//! middleware.start_sweepers();
//!
//! let tenant = TenantContext::new("branch-1");
//! let products = middleware
//!     .fetch_scoped(&tenant, QuerySpec::new(EntityType::Products).where_eq("is_active", true))
//!     .await?;
//! println!("{} products visible", products.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod isolation;
pub mod logging;
pub mod middleware;
pub mod monitoring;
pub mod query_builder;
pub mod resilience;
pub mod utils;

pub use cache::{GetOptions, RequestDeduplicator, ResultCache};
pub use config::{ConfigLoader, MiddlewareConfig};
pub use error::{QueryError, Result, TimeoutError};
pub use isolation::{
    scope_query, stamp_on_create, BranchSharingConfig, EntityType, IsolationMode, TenantContext,
};
pub use middleware::QueryMiddleware;
pub use monitoring::{PerformanceMonitor, Thresholds};
pub use query_builder::{Predicate, QuerySpec};
pub use resilience::{AdmissionController, AdmissionError};
