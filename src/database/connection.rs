use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::AdmissionConfig;
use crate::error::Result;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a pool sized to the admission budget, so admitted queries never
/// wait on a connection.
pub async fn create_pool(database_url: &str, admission: &AdmissionConfig) -> Result<PgPool> {
    let max_connections = u32::try_from(admission.max_concurrent.max(1)).unwrap_or(u32::MAX);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;

    info!(max_connections = max_connections, "Database pool created");
    Ok(pool)
}
