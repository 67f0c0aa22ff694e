//! Subscription Ledger
//!
//! The authoritative record of each tenant's subscription. At most one
//! non-terminal subscription may exist per tenant; violations surface as
//! consistency errors instead of being resolved silently.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use motorlot_shared::{
    collections, decode, pick_current_subscription, BillingCycle, EngineConfig, Filter, Plan,
    PlatformResult, RecordStore, Subscription, SubscriptionId, SubscriptionStatus, TenantId,
};

use crate::error::{BillingError, BillingResult};

#[derive(Clone)]
pub struct SubscriptionLedger {
    store: Arc<dyn RecordStore>,
}

impl SubscriptionLedger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: SubscriptionId) -> BillingResult<Subscription> {
        let doc = self
            .store
            .get(collections::SUBSCRIPTIONS, &id.to_string())
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(id.to_string()))?;
        Ok(decode(doc)?)
    }

    /// The subscription currently governing a tenant, if any
    pub async fn subscription_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> BillingResult<Option<Subscription>> {
        let subs = self.all_for_tenant(tenant_id).await?;
        Ok(pick_current_subscription(subs)?)
    }

    pub async fn all_for_tenant(&self, tenant_id: TenantId) -> BillingResult<Vec<Subscription>> {
        let docs = self
            .store
            .query(
                collections::SUBSCRIPTIONS,
                &[Filter::eq("tenant_id", tenant_id.to_string())],
                None,
                None,
            )
            .await?;
        Ok(docs
            .into_iter()
            .map(decode)
            .collect::<PlatformResult<Vec<_>>>()?)
    }

    pub async fn list_by_status(
        &self,
        status: SubscriptionStatus,
    ) -> BillingResult<Vec<Subscription>> {
        let docs = self
            .store
            .query(
                collections::SUBSCRIPTIONS,
                &[Filter::eq("status", status.to_string())],
                None,
                None,
            )
            .await?;
        Ok(docs
            .into_iter()
            .map(decode)
            .collect::<PlatformResult<Vec<_>>>()?)
    }

    /// Open a subscription for a tenant, trialing or straight to active.
    /// Rejects tenants that already have a non-terminal subscription.
    pub async fn start_subscription(
        &self,
        tenant_id: TenantId,
        plan: &Plan,
        with_trial: bool,
        config: &EngineConfig,
    ) -> BillingResult<Subscription> {
        let existing = self.all_for_tenant(tenant_id).await?;
        if existing.iter().any(|s| !s.status.is_terminal()) {
            return Err(BillingError::InvalidInput(format!(
                "tenant {} already has an open subscription",
                tenant_id
            )));
        }

        let now = OffsetDateTime::now_utc();
        let period_days = match plan.billing_cycle {
            BillingCycle::Monthly => 30,
            BillingCycle::Annual => 365,
        };
        let subscription = Subscription {
            id: SubscriptionId::new(),
            tenant_id,
            membership_id: plan.id,
            status: if with_trial {
                SubscriptionStatus::Trialing
            } else {
                SubscriptionStatus::Active
            },
            current_period_start: Some(now),
            current_period_end: Some(now + Duration::days(period_days)),
            trial_end: with_trial.then(|| now + Duration::days(config.trial_days)),
            days_past_due: 0,
            payment_failure_count: 0,
            last_payment_date: (!with_trial).then_some(now),
            suspended_at: None,
            reactivated_at: None,
            cancelled_at: None,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };
        self.persist(&subscription).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.id,
            plan_id = %plan.id,
            status = %subscription.status,
            "Started subscription"
        );
        Ok(subscription)
    }

    /// Write the full subscription document back
    pub async fn persist(&self, subscription: &Subscription) -> BillingResult<()> {
        self.store
            .set(
                collections::SUBSCRIPTIONS,
                &subscription.id.to_string(),
                serde_json::to_value(subscription)?,
            )
            .await?;
        Ok(())
    }
}
