use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::constants::isolation::BRANCH_SETTINGS_TABLE;
use crate::error::{QueryError, Result};
use crate::isolation::{BranchSettingsSource, BranchSharingConfig};
use crate::query_builder::conditions::quote_ident;

/// Reads branch sharing policy from the branch settings table
#[derive(Debug, Clone)]
pub struct PgBranchSettingsSource {
    pool: PgPool,
    table: String,
}

impl PgBranchSettingsSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: BRANCH_SETTINGS_TABLE.to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    fn lookup_sql(&self) -> String {
        format!(
            "SELECT row_to_json(s) FROM {} s WHERE s.id::text = $1",
            quote_ident(&self.table)
        )
    }
}

#[async_trait]
impl BranchSettingsSource for PgBranchSettingsSource {
    async fn get_branch_settings(&self, branch_id: &str) -> Result<BranchSharingConfig> {
        let row: Option<Value> = sqlx::query_scalar(&self.lookup_sql())
            .bind(branch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueryError::ConfigurationUnavailable {
                branch_id: branch_id.to_string(),
                reason: e.to_string(),
            })?;

        let row = row.ok_or_else(|| QueryError::ConfigurationUnavailable {
            branch_id: branch_id.to_string(),
            reason: format!("no row in {}", self.table),
        })?;
        BranchSharingConfig::from_settings_row(&row)
    }
}
