//! Plan Registry
//!
//! Read-mostly registry of membership plans. Plans are never deleted, only
//! deactivated; every mutation bumps `sync_version` and batch-invalidates
//! the cached entitlement sets of every tenant subscribed to the plan.
//! Stale reads up to the cache TTL are an accepted trade-off.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use time::OffsetDateTime;

use motorlot_shared::{
    collections, decode, BillingCycle, Filter, MembershipTier, Plan, PlanFeatures, PlanId,
    PlanType, PlatformError, PlatformResult, RecordStore, Subscription, TenantId,
};

use crate::cache::EntitlementCache;

/// Input for creating a plan
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub name: String,
    pub plan_type: PlanType,
    pub tier: MembershipTier,
    pub price_cents: i64,
    pub billing_cycle: BillingCycle,
    pub features: PlanFeatures,
}

/// Partial update applied to an existing plan
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub price_cents: Option<i64>,
    pub features: Option<PlanFeatures>,
}

pub struct PlanRegistry {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn EntitlementCache>,
    /// Read-through copy of each plan's current sync_version, so the
    /// resolver can verify cache hits without a store round trip.
    versions: RwLock<HashMap<PlanId, i64>>,
}

impl PlanRegistry {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<dyn EntitlementCache>) -> Self {
        Self {
            store,
            cache,
            versions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_plan(&self, input: NewPlan) -> PlatformResult<Plan> {
        let now = OffsetDateTime::now_utc();
        let plan = Plan {
            id: PlanId::new(),
            name: input.name,
            plan_type: input.plan_type,
            tier: input.tier,
            price_cents: input.price_cents,
            billing_cycle: input.billing_cycle,
            features: input.features,
            is_active: true,
            sync_version: 1,
            created_at: now,
            updated_at: now,
        };
        self.store
            .set(
                collections::PLANS,
                &plan.id.to_string(),
                serde_json::to_value(&plan)?,
            )
            .await?;
        self.remember_version(plan.id, plan.sync_version);
        tracing::info!(plan_id = %plan.id, tier = %plan.tier, "Created plan");
        Ok(plan)
    }

    pub async fn get_plan(&self, plan_id: PlanId) -> PlatformResult<Plan> {
        let doc = self
            .store
            .get(collections::PLANS, &plan_id.to_string())
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("plan {}", plan_id)))?;
        let plan: Plan = decode(doc)?;
        self.remember_version(plan.id, plan.sync_version);
        Ok(plan)
    }

    pub async fn list_plans(&self, active_only: bool) -> PlatformResult<Vec<Plan>> {
        let filters = if active_only {
            vec![Filter::eq("is_active", true)]
        } else {
            Vec::new()
        };
        let docs = self
            .store
            .query(collections::PLANS, &filters, None, None)
            .await?;
        docs.into_iter().map(decode).collect()
    }

    /// Apply a partial update. Bumps `sync_version` and invalidates the
    /// cached entitlement sets of every tenant on the plan.
    pub async fn update_plan(&self, plan_id: PlanId, update: PlanUpdate) -> PlatformResult<Plan> {
        let mut plan = self.get_plan(plan_id).await?;
        if let Some(name) = update.name {
            plan.name = name;
        }
        if let Some(price_cents) = update.price_cents {
            plan.price_cents = price_cents;
        }
        if let Some(features) = update.features {
            plan.features = features;
        }
        plan.sync_version += 1;
        plan.updated_at = OffsetDateTime::now_utc();

        self.store
            .set(
                collections::PLANS,
                &plan.id.to_string(),
                serde_json::to_value(&plan)?,
            )
            .await?;
        self.remember_version(plan.id, plan.sync_version);
        self.invalidate_subscribers(plan_id).await?;

        tracing::info!(
            plan_id = %plan.id,
            sync_version = plan.sync_version,
            "Updated plan"
        );
        Ok(plan)
    }

    /// Deactivate a plan. Existing subscriptions keep it; new ones cannot
    /// select it.
    pub async fn deactivate_plan(&self, plan_id: PlanId) -> PlatformResult<Plan> {
        let mut plan = self.get_plan(plan_id).await?;
        plan.is_active = false;
        plan.sync_version += 1;
        plan.updated_at = OffsetDateTime::now_utc();
        self.store
            .set(
                collections::PLANS,
                &plan.id.to_string(),
                serde_json::to_value(&plan)?,
            )
            .await?;
        self.remember_version(plan.id, plan.sync_version);
        self.invalidate_subscribers(plan_id).await?;
        tracing::info!(plan_id = %plan.id, "Deactivated plan");
        Ok(plan)
    }

    /// Last sync_version seen for a plan, if any. `None` means this
    /// process has not loaded the plan yet; callers accept the cached set
    /// in that case and let the TTL bound staleness.
    pub fn current_sync_version(&self, plan_id: PlanId) -> Option<i64> {
        self.versions.read().ok()?.get(&plan_id).copied()
    }

    fn remember_version(&self, plan_id: PlanId, version: i64) {
        if let Ok(mut versions) = self.versions.write() {
            versions.insert(plan_id, version);
        }
    }

    async fn invalidate_subscribers(&self, plan_id: PlanId) -> PlatformResult<()> {
        let docs = self
            .store
            .query(
                collections::SUBSCRIPTIONS,
                &[Filter::eq("membership_id", plan_id.to_string())],
                None,
                None,
            )
            .await?;
        let tenants: Vec<TenantId> = docs
            .into_iter()
            .filter_map(|doc| decode::<Subscription>(doc).ok())
            .map(|sub| sub.tenant_id)
            .collect();
        if !tenants.is_empty() {
            tracing::debug!(
                plan_id = %plan_id,
                tenant_count = tenants.len(),
                "Invalidating entitlement caches after plan change"
            );
            self.cache.invalidate_many(&tenants);
        }
        Ok(())
    }
}
