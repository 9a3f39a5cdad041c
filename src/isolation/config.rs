use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EntityType;
use crate::constants::isolation::{ISOLATION_MODE_COLUMN, SHARE_FLAG_PREFIX};
use crate::error::QueryError;

/// Per-branch policy deciding whether reads are scoped to the branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    Shared,
    Isolated,
    Hybrid,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::Shared => "shared",
            IsolationMode::Isolated => "isolated",
            IsolationMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(IsolationMode::Shared),
            "isolated" => Ok(IsolationMode::Isolated),
            "hybrid" => Ok(IsolationMode::Hybrid),
            other => Err(QueryError::Configuration(format!(
                "unknown isolation mode '{other}'"
            ))),
        }
    }
}

/// Visibility recorded on a row when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingMode {
    Shared,
    Isolated,
}

impl SharingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharingMode::Shared => "shared",
            SharingMode::Isolated => "isolated",
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, SharingMode::Shared)
    }
}

/// Sharing policy of one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSharingConfig {
    pub isolation_mode: IsolationMode,
    /// Share flags by entity; absent means shared
    #[serde(default)]
    pub per_entity_share: HashMap<EntityType, bool>,
}

impl BranchSharingConfig {
    pub fn new(isolation_mode: IsolationMode) -> Self {
        Self {
            isolation_mode,
            per_entity_share: HashMap::new(),
        }
    }

    pub fn shared() -> Self {
        Self::new(IsolationMode::Shared)
    }

    pub fn isolated() -> Self {
        Self::new(IsolationMode::Isolated)
    }

    pub fn hybrid() -> Self {
        Self::new(IsolationMode::Hybrid)
    }

    pub fn with_share(mut self, entity: EntityType, shared: bool) -> Self {
        self.per_entity_share.insert(entity, shared);
        self
    }

    pub fn is_entity_shared(&self, entity: &EntityType) -> bool {
        self.per_entity_share.get(entity).copied().unwrap_or(true)
    }

    /// Parse a branch settings row: `data_isolation_mode` plus any number of
    /// boolean `share_*` columns. Null share flags count as absent.
    pub fn from_settings_row(row: &Value) -> Result<Self, QueryError> {
        let object = row.as_object().ok_or_else(|| {
            QueryError::Configuration("branch settings row is not an object".to_string())
        })?;

        let isolation_mode = object
            .get(ISOLATION_MODE_COLUMN)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                QueryError::Configuration(format!("branch settings row has no {ISOLATION_MODE_COLUMN}"))
            })?
            .parse::<IsolationMode>()?;

        let mut per_entity_share = HashMap::new();
        for (column, value) in object {
            if !column.starts_with(SHARE_FLAG_PREFIX) {
                continue;
            }
            let Some(entity) = EntityType::from_share_flag(column) else {
                continue;
            };
            match value {
                Value::Bool(shared) => {
                    per_entity_share.insert(entity, *shared);
                }
                Value::Null => {}
                other => {
                    return Err(QueryError::Configuration(format!(
                        "{column} must be a boolean, got {other}"
                    )))
                }
            }
        }

        Ok(Self {
            isolation_mode,
            per_entity_share,
        })
    }
}
