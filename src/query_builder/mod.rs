//! # Query Specifications
//!
//! Reads are described by an immutable [`QuerySpec`]: the entity being read,
//! a list of [`Predicate`]s, ordering and [`Pagination`]. The isolation layer
//! extends a spec with tenant predicates, the deduplicator keys on
//! [`QuerySpec::cache_key`], and the execution adapter renders it with
//! [`QuerySpec::to_sql`]. No layer sees a database client's builder API.
//!
//! ```rust
//! use pos_query_core::isolation::EntityType;
//! use pos_query_core::query_builder::{Pagination, QuerySpec};
//!
//! let spec = QuerySpec::new(EntityType::Products)
//!     .where_eq("is_active", true)
//!     .order_asc("name")
//!     .paginate(Pagination::page(1, 50));
//!
//! let (sql, params) = spec.to_sql();
//! assert!(sql.starts_with("SELECT * FROM \"lats_products\""));
//! assert_eq!(params.len(), 1);
//! ```

pub mod builder;
pub mod conditions;
pub mod pagination;

pub use builder::{OrderBy, QuerySpec, SortDirection};
pub use conditions::Predicate;
pub use pagination::Pagination;
