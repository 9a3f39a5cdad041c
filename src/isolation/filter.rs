//! Tenant scoping decisions.
//!
//! Everything here is a pure function of entity, tenant and branch policy.
//! The same inputs always give the same predicates.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::{BranchSharingConfig, EntityType, IsolationMode, SharingMode, TenantContext};
use crate::constants::isolation::{BRANCH_ID_COLUMN, IS_SHARED_COLUMN, SHARING_MODE_COLUMN};
use crate::logging::log_isolation_decision;
use crate::query_builder::QuerySpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    NoTenant,
    /// Branch policy could not be loaded; the read was left unscoped
    ConfigUnavailable,
    SharedMode,
    IsolatedMode,
    HybridEntityShared,
    HybridEntityIsolated,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::NoTenant => "no_tenant",
            DecisionReason::ConfigUnavailable => "config_unavailable",
            DecisionReason::SharedMode => "shared_mode",
            DecisionReason::IsolatedMode => "isolated_mode",
            DecisionReason::HybridEntityShared => "hybrid_entity_shared",
            DecisionReason::HybridEntityIsolated => "hybrid_entity_isolated",
        }
    }
}

/// Outcome of the scoping rules for one entity and tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IsolationDecision {
    pub scoped: bool,
    pub mode: Option<IsolationMode>,
    pub reason: DecisionReason,
}

impl IsolationDecision {
    pub fn sharing_mode(&self) -> SharingMode {
        if self.scoped {
            SharingMode::Isolated
        } else {
            SharingMode::Shared
        }
    }
}

pub fn decide(
    entity: &EntityType,
    tenant: &TenantContext,
    config: Option<&BranchSharingConfig>,
) -> IsolationDecision {
    let unscoped = |mode, reason| IsolationDecision {
        scoped: false,
        mode,
        reason,
    };

    if !tenant.is_present() {
        return unscoped(config.map(|c| c.isolation_mode), DecisionReason::NoTenant);
    }
    let Some(config) = config else {
        return unscoped(None, DecisionReason::ConfigUnavailable);
    };

    let mode = Some(config.isolation_mode);
    match config.isolation_mode {
        IsolationMode::Shared => unscoped(mode, DecisionReason::SharedMode),
        IsolationMode::Isolated => IsolationDecision {
            scoped: true,
            mode,
            reason: DecisionReason::IsolatedMode,
        },
        IsolationMode::Hybrid if config.is_entity_shared(entity) => {
            unscoped(mode, DecisionReason::HybridEntityShared)
        }
        IsolationMode::Hybrid => IsolationDecision {
            scoped: true,
            mode,
            reason: DecisionReason::HybridEntityIsolated,
        },
    }
}

/// Apply the scoping rules to `spec`, returning the decision alongside
pub fn scope_query_with_decision(
    spec: QuerySpec,
    tenant: &TenantContext,
    config: Option<&BranchSharingConfig>,
) -> (QuerySpec, IsolationDecision) {
    let decision = decide(spec.entity(), tenant, config);

    if decision.reason == DecisionReason::ConfigUnavailable {
        warn!(
            entity_type = %spec.entity(),
            branch_id = ?tenant.branch_id(),
            "Branch sharing configuration unavailable; reading without branch filter"
        );
    }
    log_isolation_decision(
        spec.entity().as_str(),
        tenant.branch_id(),
        decision.mode.map(|m| m.as_str()),
        decision.scoped,
        decision.reason.as_str(),
    );

    let spec = match (decision.scoped, tenant.branch_id()) {
        (true, Some(branch_id)) => spec.where_eq(BRANCH_ID_COLUMN, branch_id),
        _ => spec,
    };
    (spec, decision)
}

/// Add the tenant predicate to `spec` when the branch policy requires it
pub fn scope_query(
    spec: QuerySpec,
    tenant: &TenantContext,
    config: Option<&BranchSharingConfig>,
) -> QuerySpec {
    scope_query_with_decision(spec, tenant, config).0
}

/// Record ownership and visibility on a row about to be inserted.
///
/// `branch_id` is always set when a tenant is present, whatever the mode.
/// Rows created without a tenant are returned untouched.
pub fn stamp_on_create(
    entity: &EntityType,
    tenant: &TenantContext,
    config: Option<&BranchSharingConfig>,
    mut row: Map<String, Value>,
) -> Map<String, Value> {
    let Some(branch_id) = tenant.branch_id() else {
        return row;
    };

    let sharing_mode = decide(entity, tenant, config).sharing_mode();
    row.insert(BRANCH_ID_COLUMN.to_string(), Value::from(branch_id));
    row.insert(
        SHARING_MODE_COLUMN.to_string(),
        Value::from(sharing_mode.as_str()),
    );
    row.insert(IS_SHARED_COLUMN.to_string(), Value::from(sharing_mode.is_shared()));
    row
}
