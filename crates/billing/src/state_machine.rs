//! Subscription State Machine
//!
//! Governs valid subscription transitions and drives their side effects:
//! tenant status flips, best-effort cascades over corporate resources,
//! notification decisions, and entitlement-cache invalidation. Re-applying
//! a transition the subscription is already in is a no-op apart from a
//! timestamp refresh; it never errors and never double-cascades, which is
//! what makes overlapping sweeps safe.

use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;

use motorlot_entitlements::{EntitlementCache, PlanRegistry};
use motorlot_shared::{
    collections, decode, PlanId, RecordStore, Subscription, SubscriptionId, SubscriptionStatus,
    Tenant, TenantId, TenantStatus,
};

use crate::cascade::{self, BatchOutcome};
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventLogger, BillingEventType};
use crate::ledger::SubscriptionLedger;
use crate::notifications::{Notification, NotificationDispatcher};

/// Whether `from -> to` is a legal transition. Same-state re-application
/// is handled before this table and is always accepted as a no-op.
pub fn transition_allowed(from: SubscriptionStatus, to: SubscriptionStatus) -> bool {
    use SubscriptionStatus::*;
    if from.is_terminal() {
        return false;
    }
    match (from, to) {
        // Non-payment can suspend anything still alive
        (_, Suspended) => true,
        // Cancellation is reachable from any non-terminal state
        (_, Cancelled) => true,
        (Suspended, Active) => true,
        (Trialing, Active) => true,
        (Active, PastDue) | (Trialing, PastDue) => true,
        (PastDue, Active) => true,
        (PastDue, Unpaid) => true,
        (Unpaid, Active) => true,
        (Incomplete, Active) => true,
        (Incomplete, IncompleteExpired) => true,
        _ => false,
    }
}

/// What a transition actually did
#[derive(Debug)]
pub struct TransitionOutcome {
    /// False when the subscription was already in the target status
    pub changed: bool,
    /// Per-item results of the cascade, when one ran
    pub cascade: Option<BatchOutcome>,
}

pub struct SubscriptionStateMachine {
    store: Arc<dyn RecordStore>,
    ledger: SubscriptionLedger,
    registry: Arc<PlanRegistry>,
    cache: Arc<dyn EntitlementCache>,
    notifier: Arc<dyn NotificationDispatcher>,
    events: BillingEventLogger,
}

impl SubscriptionStateMachine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<PlanRegistry>,
        cache: Arc<dyn EntitlementCache>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            ledger: SubscriptionLedger::new(store.clone()),
            events: BillingEventLogger::new(store.clone()),
            store,
            registry,
            cache,
            notifier,
        }
    }

    pub fn ledger(&self) -> &SubscriptionLedger {
        &self.ledger
    }

    /// Apply a transition and its side effects.
    pub async fn transition(
        &self,
        subscription_id: SubscriptionId,
        target: SubscriptionStatus,
        reason: &str,
    ) -> BillingResult<TransitionOutcome> {
        let mut subscription = self.ledger.get(subscription_id).await?;
        let from = subscription.status;
        let now = OffsetDateTime::now_utc();

        if from == target {
            // Idempotent re-application: refresh the timestamp, skip the
            // side effects so cascades cannot double-fire.
            subscription.updated_at = now;
            self.ledger.persist(&subscription).await?;
            tracing::debug!(
                subscription_id = %subscription_id,
                status = %target,
                "Transition re-applied; no-op"
            );
            return Ok(TransitionOutcome {
                changed: false,
                cascade: None,
            });
        }

        if !transition_allowed(from, target) {
            return Err(BillingError::InvalidTransition { from, to: target });
        }

        subscription.status = target;
        subscription.updated_at = now;
        match target {
            SubscriptionStatus::Suspended => {
                subscription.suspended_at = Some(now);
            }
            SubscriptionStatus::Active => {
                if from == SubscriptionStatus::Suspended {
                    subscription.reactivated_at = Some(now);
                }
                subscription.last_payment_date = Some(now);
                subscription.days_past_due = 0;
                subscription.payment_failure_count = 0;
            }
            SubscriptionStatus::Cancelled => {
                subscription.cancelled_at = Some(now);
            }
            _ => {}
        }
        self.ledger.persist(&subscription).await?;

        let cascade = self.apply_side_effects(&subscription, from, target).await;

        self.cache.invalidate(&subscription.tenant_id);
        self.events
            .log(
                BillingEventType::SubscriptionTransitioned,
                ActorType::System,
                Some(subscription.tenant_id),
                &subscription_id.to_string(),
                json!({"from": from.to_string(), "to": target.to_string(), "reason": reason}),
            )
            .await;

        tracing::info!(
            subscription_id = %subscription_id,
            tenant_id = %subscription.tenant_id,
            from = %from,
            to = %target,
            reason = reason,
            "Subscription transitioned"
        );

        Ok(TransitionOutcome {
            changed: true,
            cascade,
        })
    }

    async fn apply_side_effects(
        &self,
        subscription: &Subscription,
        from: SubscriptionStatus,
        target: SubscriptionStatus,
    ) -> Option<BatchOutcome> {
        let tenant_id = subscription.tenant_id;
        match target {
            SubscriptionStatus::Suspended => {
                self.set_tenant_status(tenant_id, TenantStatus::Suspended)
                    .await;
                self.notifier
                    .dispatch(Notification::AccountSuspended { tenant_id });
                match cascade::suspend_mailboxes(&self.store, tenant_id).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        tracing::error!(
                            tenant_id = %tenant_id,
                            error = %e,
                            "Cascade suspend could not enumerate mailboxes"
                        );
                        None
                    }
                }
            }
            SubscriptionStatus::Active if from == SubscriptionStatus::Suspended => {
                self.set_tenant_status(tenant_id, TenantStatus::Active).await;
                self.notifier
                    .dispatch(Notification::AccountReactivated { tenant_id });
                match cascade::reactivate_mailboxes(&self.store, tenant_id).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        tracing::error!(
                            tenant_id = %tenant_id,
                            error = %e,
                            "Cascade reactivate could not enumerate mailboxes"
                        );
                        None
                    }
                }
            }
            SubscriptionStatus::Active => {
                self.set_tenant_status(tenant_id, TenantStatus::Active).await;
                None
            }
            // Cancellation leaves the tenant alone: access runs out with
            // the paid period, checked at read time by the resolver.
            _ => None,
        }
    }

    /// Flip the tenant document's status. Best-effort: a missing tenant
    /// document is logged, not raised, so subscription state never wedges
    /// on tenant-record drift.
    async fn set_tenant_status(&self, tenant_id: TenantId, status: TenantStatus) {
        let result = self
            .store
            .update(
                collections::TENANTS,
                &tenant_id.to_string(),
                json!({"status": status.to_string()}),
            )
            .await;
        if let Err(e) = result {
            tracing::error!(
                tenant_id = %tenant_id,
                status = %status,
                error = %e,
                "Failed to propagate status to tenant"
            );
        }
    }

    /// Move a tenant's open subscription to a different plan and fan the
    /// change out to the tenant document and every user under it.
    pub async fn change_membership(
        &self,
        tenant_id: TenantId,
        new_plan_id: PlanId,
        reason: &str,
    ) -> BillingResult<BatchOutcome> {
        let plan = self.registry.get_plan(new_plan_id).await?;
        let mut subscription = self
            .ledger
            .subscription_for_tenant(tenant_id)
            .await?
            .filter(|s| !s.status.is_terminal())
            .ok_or_else(|| BillingError::SubscriptionNotFound(tenant_id.to_string()))?;

        let old_plan_id = subscription.membership_id;
        subscription.membership_id = plan.id;
        subscription.updated_at = OffsetDateTime::now_utc();
        self.ledger.persist(&subscription).await?;

        // Tenant document follows the subscription
        if let Err(e) = self
            .store
            .update(
                collections::TENANTS,
                &tenant_id.to_string(),
                json!({"membership_id": plan.id.to_string()}),
            )
            .await
        {
            tracing::error!(
                tenant_id = %tenant_id,
                error = %e,
                "Failed to propagate membership to tenant"
            );
        }

        let outcome =
            cascade::propagate_membership(&self.store, tenant_id, &plan.id.to_string()).await?;

        self.cache.invalidate(&tenant_id);
        self.notifier.dispatch(Notification::MembershipChanged {
            tenant_id,
            plan_id: plan.id,
        });
        self.events
            .log(
                BillingEventType::MembershipChanged,
                ActorType::User,
                Some(tenant_id),
                &subscription.id.to_string(),
                json!({
                    "from_plan": old_plan_id.to_string(),
                    "to_plan": plan.id.to_string(),
                    "reason": reason,
                }),
            )
            .await;

        Ok(outcome)
    }

    /// Load a tenant document
    pub async fn tenant(&self, tenant_id: TenantId) -> BillingResult<Tenant> {
        let doc = self
            .store
            .get(collections::TENANTS, &tenant_id.to_string())
            .await?
            .ok_or_else(|| BillingError::TenantNotFound(tenant_id.to_string()))?;
        Ok(decode(doc)?)
    }
}
