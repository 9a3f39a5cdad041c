//! # Caching
//!
//! Two layers sit in front of the data store:
//!
//! - [`RequestDeduplicator`] coalesces concurrent identical queries and keeps
//!   their results for about a second.
//! - [`ResultCache`] holds results for minutes, with optional
//!   stale-while-revalidate refreshes.
//!
//! Both take an injected [`Clock`](crate::utils::Clock) so expiry can be
//! tested without sleeping.

pub mod dedup;
pub mod entry;
pub mod result_cache;

pub use dedup::{DedupStats, RequestDeduplicator};
pub use entry::CacheEntry;
pub use result_cache::{CacheStats, GetOptions, ResultCache};
