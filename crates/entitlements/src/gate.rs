//! Entitlement Gate
//!
//! The public decision function: given a tenant and an action, answer
//! "is this allowed right now, and why not" with quota telemetry. The
//! gate sits on the hot path of every privileged action, so read failures
//! degrade to a deny instead of propagating; telemetry is fire-and-forget
//! and can never block or fail a decision.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use motorlot_shared::{collections, PlatformResult, QuotaField, RecordStore, TenantId};

use crate::action::{Action, ActionMap, ActionTarget};
use crate::resolver::EntitlementResolver;
use crate::usage::{ResourceKind, UsageCounters};

/// Denial reasons surfaced to callers
pub mod reasons {
    pub const NO_ACTIVE_MEMBERSHIP: &str = "no active membership";
    pub const QUOTA_EXCEEDED: &str = "quota exceeded";
    pub const NOT_INCLUDED: &str = "not included in membership";
    pub const INTERNAL_ERROR: &str = "internal error";
}

/// Outcome of an entitlement check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub limit: Option<u64>,
    pub current: Option<u64>,
    pub remaining: Option<u64>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            limit: None,
            current: None,
            remaining: None,
        }
    }

    pub fn allow_with_quota(limit: u64, current: u64) -> Self {
        Self {
            allowed: true,
            reason: None,
            limit: Some(limit),
            current: Some(current),
            remaining: Some(limit.saturating_sub(current)),
        }
    }

    pub fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            limit: None,
            current: None,
            remaining: None,
        }
    }

    pub fn deny_quota(limit: u64, current: u64) -> Self {
        Self {
            allowed: false,
            reason: Some(reasons::QUOTA_EXCEEDED.to_string()),
            limit: Some(limit),
            current: Some(current),
            remaining: Some(limit.saturating_sub(current)),
        }
    }
}

/// Per-quota usage snapshot for UI surfaces
#[derive(Debug, Clone, Serialize)]
pub struct QuotaUsage {
    pub field: QuotaField,
    /// `None` means unlimited
    pub limit: Option<u64>,
    pub current: u64,
    pub remaining: Option<u64>,
}

pub struct EntitlementGate {
    resolver: Arc<EntitlementResolver>,
    usage: Arc<UsageCounters>,
    store: Arc<dyn RecordStore>,
    actions: ActionMap,
}

impl EntitlementGate {
    /// Build the gate. Fails fast if the action map does not cover the
    /// full plan schema.
    pub fn new(
        resolver: Arc<EntitlementResolver>,
        usage: Arc<UsageCounters>,
        store: Arc<dyn RecordStore>,
    ) -> PlatformResult<Self> {
        Ok(Self {
            resolver,
            usage,
            store,
            actions: ActionMap::new()?,
        })
    }

    /// Decide whether `action` is allowed for `tenant_id` right now.
    ///
    /// Never returns an error: store failures on this read path degrade to
    /// a deny with an "internal error" reason.
    pub async fn check(&self, tenant_id: TenantId, action: Action) -> Decision {
        let decision = match self.evaluate(tenant_id, action).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    action = %action,
                    error = %e,
                    "Entitlement check degraded to deny"
                );
                Decision::deny(reasons::INTERNAL_ERROR)
            }
        };
        self.record_event(tenant_id, action, &decision);
        decision
    }

    async fn evaluate(&self, tenant_id: TenantId, action: Action) -> PlatformResult<Decision> {
        let set = self.resolver.resolve(tenant_id).await?;
        if !set.standing.is_entitled_at(OffsetDateTime::now_utc()) {
            return Ok(Decision::deny(reasons::NO_ACTIVE_MEMBERSHIP));
        }

        match self.actions.target(action) {
            ActionTarget::Quota(field) => {
                let Some(limit) = set.quota(field) else {
                    // Unlimited
                    return Ok(Decision::allow());
                };
                let current = self
                    .usage
                    .count(tenant_id, ResourceKind::for_quota(field))
                    .await?;
                if current < limit {
                    Ok(Decision::allow_with_quota(limit, current))
                } else {
                    Ok(Decision::deny_quota(limit, current))
                }
            }
            ActionTarget::Capability(field) => {
                if set.capability(field) {
                    Ok(Decision::allow())
                } else {
                    Ok(Decision::deny(reasons::NOT_INCLUDED))
                }
            }
            ActionTarget::Dynamic(key) => match set.dynamic.get(key) {
                None | Some(serde_json::Value::Null) => Ok(Decision::deny(reasons::NOT_INCLUDED)),
                Some(serde_json::Value::Bool(enabled)) => {
                    if *enabled {
                        Ok(Decision::allow())
                    } else {
                        Ok(Decision::deny(reasons::NOT_INCLUDED))
                    }
                }
                Some(serde_json::Value::Number(n)) => {
                    let limit = n.as_f64().unwrap_or(0.0);
                    if limit > 0.0 {
                        Ok(Decision {
                            allowed: true,
                            reason: None,
                            limit: Some(limit as u64),
                            current: None,
                            remaining: None,
                        })
                    } else {
                        Ok(Decision::deny(reasons::NOT_INCLUDED))
                    }
                }
                // Strings and enum options: presence is sufficient
                Some(_) => Ok(Decision::allow()),
            },
        }
    }

    /// Usage snapshot across every quota field, for dashboards
    pub async fn quota_overview(&self, tenant_id: TenantId) -> PlatformResult<Vec<QuotaUsage>> {
        let set = self.resolver.resolve(tenant_id).await?;
        let mut overview = Vec::with_capacity(QuotaField::ALL.len());
        for field in QuotaField::ALL {
            let current = self
                .usage
                .count(tenant_id, ResourceKind::for_quota(field))
                .await?;
            let limit = set.quota(field);
            overview.push(QuotaUsage {
                field,
                limit,
                current,
                remaining: limit.map(|l| l.saturating_sub(current)),
            });
        }
        Ok(overview)
    }

    /// Fire-and-forget telemetry; failures are logged and dropped
    fn record_event(&self, tenant_id: TenantId, action: Action, decision: &Decision) {
        let store = Arc::clone(&self.store);
        let event = serde_json::json!({
            "id": Uuid::new_v4().to_string(),
            "tenant_id": tenant_id.to_string(),
            "action": action.as_str(),
            "allowed": decision.allowed,
            "reason": decision.reason,
            "created_at": OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .ok(),
        });
        tokio::spawn(async move {
            let id = event["id"].as_str().unwrap_or_default().to_string();
            if let Err(e) = store.set(collections::GATE_EVENTS, &id, event).await {
                tracing::debug!(error = %e, "Failed to record gate event");
            }
        });
    }
}
