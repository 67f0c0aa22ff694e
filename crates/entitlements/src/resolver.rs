//! Entitlement Resolver
//!
//! Computes the effective entitlement set for a tenant by merging the
//! static plan bundle with active dynamic-catalog overlays, under the
//! subscription's current standing. Results are cached with a TTL;
//! concurrent refreshes of the same tenant race last-writer-wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use motorlot_shared::{
    collections, decode, pick_current_subscription, CapabilityField, Filter, MembershipTier,
    PlanId, PlatformError, PlatformResult, QuotaField, RecordStore, Subscription,
    SubscriptionStatus, TenantId,
};

use crate::cache::EntitlementCache;
use crate::features::{validate, DynamicFeatureCatalog};
use crate::plan::PlanRegistry;

/// The subscription standing behind an entitlement set.
///
/// `NoMembership` is a distinguishable marker, not an error: tenants
/// without an entitlement-granting subscription resolve to an all-zero,
/// all-false set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MembershipStanding {
    Member {
        plan_id: PlanId,
        tier: MembershipTier,
        status: SubscriptionStatus,
    },
    /// Cancelled, but the paid period has not ended yet
    GracePeriod {
        plan_id: PlanId,
        tier: MembershipTier,
        #[serde(with = "time::serde::rfc3339")]
        until: OffsetDateTime,
    },
    NoMembership,
}

impl MembershipStanding {
    pub fn is_entitled(&self) -> bool {
        !matches!(self, Self::NoMembership)
    }

    /// Entitled at `now`, accounting for grace-period expiry on cached sets
    pub fn is_entitled_at(&self, now: OffsetDateTime) -> bool {
        match self {
            Self::Member { .. } => true,
            Self::GracePeriod { until, .. } => now < *until,
            Self::NoMembership => false,
        }
    }
}

/// Merged, cached view of everything a tenant is entitled to right now
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveEntitlementSet {
    pub tenant_id: TenantId,
    pub standing: MembershipStanding,
    /// Quota limits; `None` means unlimited
    pub quotas: BTreeMap<QuotaField, Option<u64>>,
    pub capabilities: BTreeMap<CapabilityField, bool>,
    /// Values of active dynamic features present in the plan payload
    pub dynamic: BTreeMap<String, serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_synced_at: OffsetDateTime,
    pub source_sync_version: i64,
}

impl EffectiveEntitlementSet {
    /// The all-zero, all-false set for tenants without a membership
    pub fn no_membership(tenant_id: TenantId, now: OffsetDateTime) -> Self {
        Self {
            tenant_id,
            standing: MembershipStanding::NoMembership,
            quotas: QuotaField::ALL.iter().map(|f| (*f, Some(0))).collect(),
            capabilities: CapabilityField::ALL.iter().map(|f| (*f, false)).collect(),
            dynamic: BTreeMap::new(),
            last_synced_at: now,
            source_sync_version: 0,
        }
    }

    /// Quota limit for a field; `None` means unlimited
    pub fn quota(&self, field: QuotaField) -> Option<u64> {
        self.quotas.get(&field).copied().unwrap_or(Some(0))
    }

    pub fn capability(&self, field: CapabilityField) -> bool {
        self.capabilities.get(&field).copied().unwrap_or(false)
    }
}

pub struct EntitlementResolver {
    store: Arc<dyn RecordStore>,
    registry: Arc<PlanRegistry>,
    catalog: Arc<DynamicFeatureCatalog>,
    cache: Arc<dyn EntitlementCache>,
}

impl EntitlementResolver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<PlanRegistry>,
        catalog: Arc<DynamicFeatureCatalog>,
        cache: Arc<dyn EntitlementCache>,
    ) -> Self {
        Self {
            store,
            registry,
            catalog,
            cache,
        }
    }

    /// Resolve the effective entitlement set for a tenant.
    ///
    /// Returns the cached set when it is within TTL and its source
    /// sync_version still matches the plan; otherwise recomputes from the
    /// subscription, plan, and dynamic catalog, and refreshes the cache.
    pub async fn resolve(&self, tenant_id: TenantId) -> PlatformResult<EffectiveEntitlementSet> {
        if let Some(cached) = self.cache.get(&tenant_id) {
            let fresh = match &cached.standing {
                MembershipStanding::Member { plan_id, .. }
                | MembershipStanding::GracePeriod { plan_id, .. } => self
                    .registry
                    .current_sync_version(*plan_id)
                    .is_none_or(|v| v == cached.source_sync_version),
                MembershipStanding::NoMembership => true,
            };
            if fresh {
                return Ok(cached);
            }
        }

        let set = self.recompute(tenant_id).await?;
        self.cache.set(set.clone());
        Ok(set)
    }

    /// Drop the cached set for a tenant, forcing the next resolve to
    /// recompute
    pub fn invalidate(&self, tenant_id: TenantId) {
        self.cache.invalidate(&tenant_id);
    }

    async fn recompute(&self, tenant_id: TenantId) -> PlatformResult<EffectiveEntitlementSet> {
        let now = OffsetDateTime::now_utc();

        let docs = self
            .store
            .query(
                collections::SUBSCRIPTIONS,
                &[Filter::eq("tenant_id", tenant_id.to_string())],
                None,
                None,
            )
            .await?;
        let subs: Vec<Subscription> = docs
            .into_iter()
            .map(decode)
            .collect::<PlatformResult<_>>()?;
        let Some(subscription) = pick_current_subscription(subs)? else {
            return Ok(EffectiveEntitlementSet::no_membership(tenant_id, now));
        };

        if !subscription.grants_entitlements(now) {
            return Ok(EffectiveEntitlementSet::no_membership(tenant_id, now));
        }

        let plan = match self.registry.get_plan(subscription.membership_id).await {
            Ok(plan) => plan,
            Err(PlatformError::NotFound(_)) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    plan_id = %subscription.membership_id,
                    "Subscription references a missing plan; resolving as no membership"
                );
                return Ok(EffectiveEntitlementSet::no_membership(tenant_id, now));
            }
            Err(e) => return Err(e),
        };

        let standing = if subscription.status == SubscriptionStatus::Cancelled {
            // grants_entitlements already checked the period end exists
            let until = subscription.current_period_end.unwrap_or(now);
            MembershipStanding::GracePeriod {
                plan_id: plan.id,
                tier: plan.tier,
                until,
            }
        } else {
            MembershipStanding::Member {
                plan_id: plan.id,
                tier: plan.tier,
                status: subscription.status,
            }
        };

        let quotas = QuotaField::ALL
            .iter()
            .map(|f| (*f, plan.features.quota(*f)))
            .collect();
        let capabilities = CapabilityField::ALL
            .iter()
            .map(|f| (*f, plan.features.capability(*f)))
            .collect();

        // Overlay only keys that are present in the plan payload AND still
        // active in the catalog; unknown keys stay absent, not defaulted.
        let mut dynamic = BTreeMap::new();
        for (key, value) in &plan.features.dynamic {
            let Some(definition) = self.catalog.get(key).await? else {
                continue;
            };
            if !definition.is_active {
                continue;
            }
            if let Err(e) = validate(&definition, value) {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    key = %key,
                    error = %e,
                    "Skipping dynamic feature with invalid plan value"
                );
                continue;
            }
            dynamic.insert(key.clone(), value.clone());
        }

        Ok(EffectiveEntitlementSet {
            tenant_id,
            standing,
            quotas,
            capabilities,
            dynamic,
            last_synced_at: now,
            source_sync_version: plan.sync_version,
        })
    }
}
