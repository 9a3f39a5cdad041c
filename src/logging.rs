//! # Structured Logging Module
//!
//! Environment-aware structured logging for the query middleware. Console
//! output by default, JSON lines when `POS_QUERY_LOG_FORMAT=json`.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::constants;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let json = std::env::var(constants::env::LOG_FORMAT)
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let console = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A subscriber may already be installed by the embedding application
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    constants::env::ENVIRONMENT_VARS
        .iter()
        .find_map(|name| std::env::var(name).ok())
        .unwrap_or_else(|| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for cache operations
pub fn log_cache_operation(
    component: &str,
    operation: &str,
    key: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        component = %component,
        operation = %operation,
        key = %key,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "CACHE_OPERATION"
    );
}

/// Log structured data for admission decisions
pub fn log_admission_event(event: &str, priority: i32, active: usize, queued: usize, max: usize) {
    tracing::debug!(
        event = %event,
        priority = priority,
        active = active,
        queued = queued,
        max_concurrent = max,
        timestamp = %Utc::now().to_rfc3339(),
        "ADMISSION_EVENT"
    );
}

/// Log structured data for isolation decisions
pub fn log_isolation_decision(
    entity_type: &str,
    branch_id: Option<&str>,
    mode: Option<&str>,
    scoped: bool,
    reason: &str,
) {
    tracing::debug!(
        entity_type = %entity_type,
        branch_id = branch_id,
        mode = mode,
        scoped = scoped,
        reason = %reason,
        timestamp = %Utc::now().to_rfc3339(),
        "ISOLATION_DECISION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
