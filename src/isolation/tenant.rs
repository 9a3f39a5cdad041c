use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{QueryError, Result};

/// The branch a request is issued for. `None` means no branch is selected
/// and reads are left unscoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    branch_id: Option<String>,
}

impl TenantContext {
    pub fn new(branch_id: impl Into<String>) -> Self {
        let branch_id = branch_id.into();
        if branch_id.trim().is_empty() {
            Self::none()
        } else {
            Self {
                branch_id: Some(branch_id),
            }
        }
    }

    pub fn none() -> Self {
        Self { branch_id: None }
    }

    pub fn from_option(branch_id: Option<String>) -> Self {
        branch_id.map(Self::new).unwrap_or_default()
    }

    pub fn branch_id(&self) -> Option<&str> {
        self.branch_id.as_deref()
    }

    pub fn is_present(&self) -> bool {
        self.branch_id.is_some()
    }
}

/// Where the current branch id comes from. Read once per request at the
/// boundary and passed down explicitly.
#[async_trait]
pub trait TenantContextSource: Send + Sync {
    async fn current_tenant(&self) -> Result<TenantContext>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticTenantSource {
    tenant: TenantContext,
}

impl StaticTenantSource {
    pub fn new(tenant: TenantContext) -> Self {
        Self { tenant }
    }
}

#[async_trait]
impl TenantContextSource for StaticTenantSource {
    async fn current_tenant(&self) -> Result<TenantContext> {
        Ok(self.tenant.clone())
    }
}

/// Reads the persisted branch id from a file holding just the id. A missing
/// or empty file means no branch is selected.
#[derive(Debug, Clone)]
pub struct FileTenantSource {
    path: PathBuf,
}

impl FileTenantSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TenantContextSource for FileTenantSource {
    async fn current_tenant(&self) -> Result<TenantContext> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let tenant = TenantContext::new(contents.trim());
                debug!(path = %self.path.display(), branch_id = ?tenant.branch_id(), "Read current branch");
                Ok(tenant)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TenantContext::none()),
            Err(e) => Err(QueryError::Configuration(format!(
                "failed to read current branch from {}: {e}",
                self.path.display()
            ))),
        }
    }
}
