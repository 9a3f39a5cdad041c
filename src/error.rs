use std::sync::Arc;
use std::time::Duration;

use crate::constants;
use crate::resilience::AdmissionError;

/// Crate-wide error type.
///
/// `Clone` so that a single failed execution can be fanned out to every
/// caller coalesced onto it by the request deduplicator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Admission queue full ({depth} operations waiting)")]
    QueueFull { depth: usize },

    #[error("Operation for key '{key}' timed out after {after:?}")]
    Timeout { key: String, after: Duration },

    #[error("Database error: {0}")]
    Database(Arc<sqlx::Error>),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Branch configuration unavailable for {branch_id}: {reason}")]
    ConfigurationUnavailable { branch_id: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for QueryError {
    fn from(error: sqlx::Error) -> Self {
        QueryError::Database(Arc::new(error))
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(error: serde_json::Error) -> Self {
        QueryError::Serialization(error.to_string())
    }
}

/// Raised by caller-side timeout wrapping; never by admission or dedup themselves.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Request '{key}' timed out after {after:?}")]
pub struct TimeoutError {
    pub key: String,
    pub after: Duration,
}

impl From<TimeoutError> for QueryError {
    fn from(error: TimeoutError) -> Self {
        QueryError::Timeout {
            key: error.key,
            after: error.after,
        }
    }
}

impl From<AdmissionError<QueryError>> for QueryError {
    fn from(error: AdmissionError<QueryError>) -> Self {
        match error {
            AdmissionError::Cancelled => {
                QueryError::Cancelled(constants::admission::CANCELLED_MESSAGE.to_string())
            }
            AdmissionError::QueueFull { depth } => QueryError::QueueFull { depth },
            AdmissionError::Operation(inner) => inner,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
