//! End-to-end entitlement checks against the in-memory record store

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};

use motorlot_entitlements::{
    reasons, Action, DynamicFeatureCatalog, EntitlementCache, EntitlementGate,
    EntitlementResolver, MemoryEntitlementCache, NewFeature, NewPlan, PlanRegistry, PlanUpdate,
    UsageCounters,
};
use motorlot_shared::{
    collections, BillingCycle, FeatureType, Filter, MembershipTier, MemoryStore, Order, Plan,
    PlanFeatures, PlanId, PlanType, PlatformError, PlatformResult, RecordStore, Subscription,
    SubscriptionId, SubscriptionStatus, TenantId,
};

struct Harness {
    store: Arc<MemoryStore>,
    cache: Arc<MemoryEntitlementCache>,
    registry: Arc<PlanRegistry>,
    catalog: Arc<DynamicFeatureCatalog>,
    gate: EntitlementGate,
}

fn harness_with_store(store: Arc<dyn RecordStore>, memory: Arc<MemoryStore>) -> Harness {
    let cache = Arc::new(MemoryEntitlementCache::new());
    let registry = Arc::new(PlanRegistry::new(store.clone(), cache.clone()));
    let catalog = Arc::new(DynamicFeatureCatalog::new(store.clone()));
    let resolver = Arc::new(EntitlementResolver::new(
        store.clone(),
        registry.clone(),
        catalog.clone(),
        cache.clone(),
    ));
    let usage = Arc::new(UsageCounters::new(store.clone()));
    let gate = EntitlementGate::new(resolver, usage, store).unwrap();
    Harness {
        store: memory,
        cache,
        registry,
        catalog,
        gate,
    }
}

fn harness() -> Harness {
    let memory = Arc::new(MemoryStore::new());
    harness_with_store(memory.clone(), memory)
}

fn professional_features() -> PlanFeatures {
    PlanFeatures {
        max_sellers: Some(5),
        max_vehicles: Some(50),
        max_campaigns: Some(3),
        max_api_calls_month: Some(10_000),
        max_storage_mb: Some(512),
        ai_descriptions: true,
        custom_domain: false,
        advanced_reports: true,
        whatsapp_integration: false,
        priority_support: false,
        dynamic: Default::default(),
    }
}

async fn create_plan(h: &Harness, tier: MembershipTier, features: PlanFeatures) -> Plan {
    h.registry
        .create_plan(NewPlan {
            name: format!("{} dealer", tier),
            plan_type: PlanType::Dealer,
            tier,
            price_cents: 9900,
            billing_cycle: BillingCycle::Monthly,
            features,
        })
        .await
        .unwrap()
}

async fn subscribe(h: &Harness, tenant_id: TenantId, plan_id: PlanId, status: SubscriptionStatus) {
    let now = OffsetDateTime::now_utc();
    let sub = Subscription {
        id: SubscriptionId::new(),
        tenant_id,
        membership_id: plan_id,
        status,
        current_period_start: Some(now - Duration::days(5)),
        current_period_end: Some(now + Duration::days(25)),
        trial_end: None,
        days_past_due: 0,
        payment_failure_count: 0,
        last_payment_date: Some(now - Duration::days(5)),
        suspended_at: None,
        reactivated_at: None,
        cancelled_at: None,
        cancel_at_period_end: false,
        created_at: now - Duration::days(5),
        updated_at: now,
    };
    h.store
        .set(
            collections::SUBSCRIPTIONS,
            &sub.id.to_string(),
            serde_json::to_value(&sub).unwrap(),
        )
        .await
        .unwrap();
}

async fn add_sellers(h: &Harness, tenant_id: TenantId, count: usize) {
    for i in 0..count {
        let id = format!("seller-{}-{}", tenant_id, i);
        h.store
            .set(
                collections::SELLERS,
                &id,
                json!({"id": id, "tenant_id": tenant_id.to_string(), "status": "active"}),
            )
            .await
            .unwrap();
    }
}

// Scenario A: Professional plan with max_sellers=5 and 5 active sellers
#[tokio::test]
async fn quota_exhausted_denies_with_telemetry() {
    let h = harness();
    let plan = create_plan(&h, MembershipTier::Professional, professional_features()).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;
    add_sellers(&h, tenant, 5).await;

    let decision = h.gate.check(tenant, Action::CreateSeller).await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason.as_deref(), Some(reasons::QUOTA_EXCEEDED));
    assert_eq!(decision.limit, Some(5));
    assert_eq!(decision.current, Some(5));
    assert_eq!(decision.remaining, Some(0));
}

#[tokio::test]
async fn quota_under_limit_allows_with_remaining() {
    let h = harness();
    let plan = create_plan(&h, MembershipTier::Professional, professional_features()).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;
    add_sellers(&h, tenant, 3).await;

    let decision = h.gate.check(tenant, Action::CreateSeller).await;
    assert!(decision.allowed);
    assert_eq!(decision.limit, Some(5));
    assert_eq!(decision.current, Some(3));
    assert_eq!(decision.remaining, Some(2));
}

// Scenario B: Premium plan with unlimited sellers
#[tokio::test]
async fn unlimited_quota_allows_regardless_of_current() {
    let h = harness();
    let features = PlanFeatures {
        max_sellers: None,
        ..professional_features()
    };
    let plan = create_plan(&h, MembershipTier::Premium, features).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;
    add_sellers(&h, tenant, 200).await;

    let decision = h.gate.check(tenant, Action::CreateSeller).await;
    assert!(decision.allowed);
    assert_eq!(decision.limit, None);
}

#[tokio::test]
async fn zero_quota_is_not_unlimited() {
    let h = harness();
    let features = PlanFeatures {
        max_campaigns: Some(0),
        ..professional_features()
    };
    let plan = create_plan(&h, MembershipTier::Basic, features).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;

    let decision = h.gate.check(tenant, Action::CreateCampaign).await;
    assert!(!decision.allowed);
    assert_eq!(decision.limit, Some(0));
    assert_eq!(decision.remaining, Some(0));
}

// Property: any non-entitling status denies every action
#[tokio::test]
async fn non_entitling_statuses_deny_everything() {
    for status in [
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Suspended,
        SubscriptionStatus::Unpaid,
        SubscriptionStatus::Incomplete,
    ] {
        let h = harness();
        let plan = create_plan(&h, MembershipTier::Premium, professional_features()).await;
        let tenant = TenantId::new();
        subscribe(&h, tenant, plan.id, status).await;

        for action in [
            Action::CreateSeller,
            Action::GenerateAiDescription,
            Action::PublishBanner,
        ] {
            let decision = h.gate.check(tenant, action).await;
            assert!(!decision.allowed, "{status:?}/{action:?} should deny");
            assert_eq!(
                decision.reason.as_deref(),
                Some(reasons::NO_ACTIVE_MEMBERSHIP)
            );
        }
    }
}

#[tokio::test]
async fn tenant_without_subscription_denies() {
    let h = harness();
    create_plan(&h, MembershipTier::Basic, professional_features()).await;
    let decision = h.gate.check(TenantId::new(), Action::AddVehicle).await;
    assert!(!decision.allowed);
    assert_eq!(
        decision.reason.as_deref(),
        Some(reasons::NO_ACTIVE_MEMBERSHIP)
    );
}

#[tokio::test]
async fn cancelled_subscription_keeps_access_until_period_end() {
    let h = harness();
    let plan = create_plan(&h, MembershipTier::Professional, professional_features()).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Cancelled).await;

    // Period end is 25 days out; grace applies
    let decision = h.gate.check(tenant, Action::GenerateAiDescription).await;
    assert!(decision.allowed);

    // Expire the period; grace is gone on the next recompute
    let subs = h
        .store
        .query(collections::SUBSCRIPTIONS, &[], None, None)
        .await
        .unwrap();
    let sub_id = subs[0]["id"].as_str().unwrap().to_string();
    let past = (OffsetDateTime::now_utc() - Duration::days(1))
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap();
    h.store
        .update(
            collections::SUBSCRIPTIONS,
            &sub_id,
            json!({"current_period_end": past}),
        )
        .await
        .unwrap();
    h.cache.invalidate(&tenant);

    let decision = h.gate.check(tenant, Action::GenerateAiDescription).await;
    assert!(!decision.allowed);
    assert_eq!(
        decision.reason.as_deref(),
        Some(reasons::NO_ACTIVE_MEMBERSHIP)
    );
}

#[tokio::test]
async fn capability_gating() {
    let h = harness();
    let plan = create_plan(&h, MembershipTier::Professional, professional_features()).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;

    assert!(h.gate.check(tenant, Action::GenerateAiDescription).await.allowed);

    let denied = h.gate.check(tenant, Action::UseCustomDomain).await;
    assert!(!denied.allowed);
    assert_eq!(denied.reason.as_deref(), Some(reasons::NOT_INCLUDED));
}

#[tokio::test]
async fn dynamic_feature_gating() {
    let h = harness();
    h.catalog
        .define(NewFeature {
            key: "banner_slots".to_string(),
            feature_type: FeatureType::Number,
            category: "marketing".to_string(),
            min: Some(0.0),
            max: None,
            options: Vec::new(),
            default_value: None,
        })
        .await
        .unwrap();

    let mut features = professional_features();
    features
        .dynamic
        .insert("banner_slots".to_string(), json!(4));
    // A key the catalog has never seen stays absent at resolve time
    features
        .dynamic
        .insert("mystery_flag".to_string(), json!(true));
    let plan = create_plan(&h, MembershipTier::Premium, features).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;

    let banner = h.gate.check(tenant, Action::PublishBanner).await;
    assert!(banner.allowed);
    assert_eq!(banner.limit, Some(4));

    // monthly_promotions was never granted by this plan
    let promotion = h.gate.check(tenant, Action::CreatePromotion).await;
    assert!(!promotion.allowed);
    assert_eq!(promotion.reason.as_deref(), Some(reasons::NOT_INCLUDED));
}

#[tokio::test]
async fn plan_update_invalidates_cached_entitlements() {
    let h = harness();
    let plan = create_plan(&h, MembershipTier::Professional, professional_features()).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;
    add_sellers(&h, tenant, 5).await;

    // Warm the cache at limit 5
    assert!(!h.gate.check(tenant, Action::CreateSeller).await.allowed);

    // Raise the limit; the plan mutation must invalidate the cached set
    let features = PlanFeatures {
        max_sellers: Some(10),
        ..professional_features()
    };
    h.registry
        .update_plan(
            plan.id,
            PlanUpdate {
                features: Some(features),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let decision = h.gate.check(tenant, Action::CreateSeller).await;
    assert!(decision.allowed);
    assert_eq!(decision.limit, Some(10));
    assert_eq!(decision.remaining, Some(5));
}

#[tokio::test]
async fn quota_overview_reports_every_field() {
    let h = harness();
    let plan = create_plan(&h, MembershipTier::Professional, professional_features()).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;
    add_sellers(&h, tenant, 2).await;

    let overview = h.gate.quota_overview(tenant).await.unwrap();
    assert_eq!(overview.len(), 5);
    let sellers = overview
        .iter()
        .find(|q| q.field == motorlot_shared::QuotaField::MaxSellers)
        .unwrap();
    assert_eq!(sellers.limit, Some(5));
    assert_eq!(sellers.current, 2);
    assert_eq!(sellers.remaining, Some(3));
}

#[tokio::test]
async fn gate_records_telemetry_events() {
    let h = harness();
    let plan = create_plan(&h, MembershipTier::Professional, professional_features()).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;

    h.gate.check(tenant, Action::AddVehicle).await;

    // Telemetry is fire-and-forget; give the spawned task a moment
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let events = h
        .store
        .query(
            collections::GATE_EVENTS,
            &[Filter::eq("tenant_id", tenant.to_string())],
            Some(Order::asc("created_at")),
            None,
        )
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["action"], "add_vehicle");
    assert_eq!(events[0]["allowed"], true);
}

/// Store wrapper that fails every usage-collection query
struct FlakyStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> PlatformResult<Option<Value>> {
        self.inner.get(collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<Order>,
        limit: Option<usize>,
    ) -> PlatformResult<Vec<Value>> {
        if collection == collections::SELLERS {
            return Err(PlatformError::Store("connection reset".to_string()));
        }
        self.inner.query(collection, filters, order, limit).await
    }

    async fn set(&self, collection: &str, id: &str, doc: Value) -> PlatformResult<()> {
        self.inner.set(collection, id, doc).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> PlatformResult<()> {
        self.inner.update(collection, id, fields).await
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
        fields: Value,
    ) -> PlatformResult<bool> {
        self.inner
            .update_if(collection, id, field, expected, fields)
            .await
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> PlatformResult<()> {
        self.inner.increment(collection, id, field, delta).await
    }

    async fn delete(&self, collection: &str, id: &str) -> PlatformResult<()> {
        self.inner.delete(collection, id).await
    }
}

#[tokio::test]
async fn usage_read_failure_degrades_to_deny() {
    let memory = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore {
        inner: memory.clone(),
    });
    let h = harness_with_store(flaky, memory);

    let plan = create_plan(&h, MembershipTier::Professional, professional_features()).await;
    let tenant = TenantId::new();
    subscribe(&h, tenant, plan.id, SubscriptionStatus::Active).await;

    let decision = h.gate.check(tenant, Action::CreateSeller).await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason.as_deref(), Some(reasons::INTERNAL_ERROR));
}
