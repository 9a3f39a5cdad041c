//! # Branch Isolation
//!
//! Decides whether a read must be restricted to the requesting branch and
//! stamps ownership on newly created rows.
//!
//! | tenant | branch policy          | result                   |
//! |--------|------------------------|--------------------------|
//! | none   | any                    | unscoped                 |
//! | some   | unavailable            | unscoped, warning logged |
//! | some   | shared                 | unscoped                 |
//! | some   | isolated               | `branch_id = tenant`     |
//! | some   | hybrid, entity shared  | unscoped                 |
//! | some   | hybrid, entity private | `branch_id = tenant`     |
//!
//! Branch policies are loaded through [`BranchConfigResolver`], which caches
//! them per branch for a short TTL.

pub mod config;
pub mod entity;
pub mod filter;
pub mod resolver;
pub mod tenant;

pub use config::{BranchSharingConfig, IsolationMode, SharingMode};
pub use entity::EntityType;
pub use filter::{
    decide, scope_query, scope_query_with_decision, stamp_on_create, DecisionReason,
    IsolationDecision,
};
pub use resolver::{BranchConfigResolver, BranchSettingsSource, StaticBranchSettingsSource};
pub use tenant::{FileTenantSource, StaticTenantSource, TenantContext, TenantContextSource};
