//! # System Constants
//!
//! Default limits and well-known names shared by the middleware components.
//! Configuration profiles start from these values.

/// Defaults for the admission controller
pub mod admission {
    /// Matches the connection budget of the remote pooler
    pub const DEFAULT_MAX_CONCURRENT: usize = 10;
    pub const CANCELLED_MESSAGE: &str = "queue cleared before admission";
}

/// Defaults for request deduplication
pub mod deduplication {
    /// Window during which a completed result is served without re-execution
    pub const DEFAULT_TTL_MS: u64 = 1_000;
    /// Entries older than this are swept regardless of per-call TTL
    pub const DEFAULT_MAX_AGE_MS: u64 = 60_000;
    pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;
}

/// Defaults for the general result cache
pub mod result_cache {
    pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1_000;
    pub const DEFAULT_MAX_ENTRIES: usize = 500;
    pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
}

/// Branch isolation defaults and column names
pub mod isolation {
    pub const DEFAULT_CONFIG_TTL_MS: u64 = 30_000;
    pub const DEFAULT_CONFIG_MAX_ENTRIES: usize = 100;
    pub const BRANCH_ID_COLUMN: &str = "branch_id";
    pub const SHARING_MODE_COLUMN: &str = "sharing_mode";
    pub const IS_SHARED_COLUMN: &str = "is_shared";
    pub const ISOLATION_MODE_COLUMN: &str = "data_isolation_mode";
    pub const SHARE_FLAG_PREFIX: &str = "share_";
    pub const BRANCH_SETTINGS_TABLE: &str = "store_locations";
}

/// Performance monitor thresholds
pub mod monitor {
    pub const DEFAULT_WARNING_MS: u64 = 1_000;
    pub const DEFAULT_CRITICAL_MS: u64 = 3_000;
    pub const DEFAULT_MAX_METRICS: usize = 1_000;
}

/// Environment variables consulted by configuration and logging
pub mod env {
    pub const ENVIRONMENT_VARS: [&str; 3] = ["POS_QUERY_ENV", "APP_ENV", "RUST_ENV"];
    pub const LOG_FORMAT: &str = "POS_QUERY_LOG_FORMAT";
    pub const OVERRIDE_PREFIX: &str = "POS_QUERY";
}
