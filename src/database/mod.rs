//! # Database Access
//!
//! The only place that talks to PostgreSQL. Everything above it works with
//! [`QuerySpec`](crate::query_builder::QuerySpec) values and the
//! [`QueryExecutor`] trait, so the middleware can be exercised against an
//! in-memory executor in tests.
//!
//! - [`connection`] - pool creation sized to the admission budget
//! - [`executor`] - [`PgQueryExecutor`], rendering specs to parameterised SQL
//! - [`branch_settings`] - [`PgBranchSettingsSource`] over `store_locations`
//!
//! ```rust,no_run
//! use pos_query_core::config::AdmissionConfig;
//! use pos_query_core::database::{create_pool, PgQueryExecutor, QueryExecutor};
//! use pos_query_core::isolation::EntityType;
//! use pos_query_core::query_builder::QuerySpec;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = create_pool("postgresql://localhost/pos", &AdmissionConfig::default()).await?;
//! let executor = PgQueryExecutor::new(pool);
//! let rows = executor.fetch(&QuerySpec::new(EntityType::Products).limit(10)).await?;
//! # Ok(())
//! # }
//! ```

pub mod branch_settings;
pub mod connection;
pub mod executor;

pub use branch_settings::PgBranchSettingsSource;
pub use connection::create_pool;
pub use executor::{PgQueryExecutor, QueryExecutor};
