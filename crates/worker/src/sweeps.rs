//! Scheduled sweeps
//!
//! Background passes over the subscription and referral ledgers. Sweeps
//! run on plain intervals and may overlap with each other and with
//! gateway-driven transitions; correctness comes from transition
//! idempotency and conditional writes, never from locking. Store reads
//! retry with exponential backoff so one transient failure does not kill a
//! cycle; per-item failures are logged and the cycle continues.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use motorlot_billing::{ReferralProgram, SubscriptionLedger, SubscriptionStateMachine};
use motorlot_entitlements::EntitlementCache;
use motorlot_shared::{
    collections, decode, RecordStore, ReferralStatus, SubscriptionStatus, User,
};

fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(100).map(jitter).take(3)
}

/// Detects subscriptions past due beyond the grace window and suspends
/// them. Also keeps `days_past_due` current on the ones still in grace.
pub struct PastDueSweep {
    store: Arc<dyn RecordStore>,
    ledger: SubscriptionLedger,
    state_machine: Arc<SubscriptionStateMachine>,
    grace_days: i64,
}

impl PastDueSweep {
    pub fn new(
        store: Arc<dyn RecordStore>,
        state_machine: Arc<SubscriptionStateMachine>,
        grace_days: i64,
    ) -> Self {
        Self {
            ledger: SubscriptionLedger::new(store.clone()),
            store,
            state_machine,
            grace_days,
        }
    }

    /// One pass. Returns how many subscriptions were suspended.
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let past_due = Retry::spawn(retry_strategy(), || {
            self.ledger.list_by_status(SubscriptionStatus::PastDue)
        })
        .await?;

        let now = OffsetDateTime::now_utc();
        let mut suspended = 0;
        for subscription in past_due {
            let reference = subscription
                .current_period_end
                .unwrap_or(subscription.updated_at);
            let days_past_due = (now - reference).whole_days().max(0);

            if let Err(e) = self
                .store
                .update(
                    collections::SUBSCRIPTIONS,
                    &subscription.id.to_string(),
                    json!({"days_past_due": days_past_due}),
                )
                .await
            {
                tracing::error!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to stamp days_past_due; continuing"
                );
            }

            if days_past_due <= self.grace_days {
                continue;
            }
            match self
                .state_machine
                .transition(
                    subscription.id,
                    SubscriptionStatus::Suspended,
                    "past due beyond grace",
                )
                .await
            {
                Ok(outcome) if outcome.changed => suspended += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Past-due suspension failed; continuing"
                    );
                }
            }
        }

        if suspended > 0 {
            tracing::info!(suspended, "Past-due sweep suspended subscriptions");
        }
        Ok(suspended)
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "Past-due sweep cycle failed");
                }
            }
        })
    }
}

/// Matures pending referrals: cancels the ones whose referred account
/// churned, confirms and rewards the ones that survived the window.
pub struct ReferralMaturationSweep {
    store: Arc<dyn RecordStore>,
    ledger: SubscriptionLedger,
    referrals: Arc<ReferralProgram>,
    qualification_days: i64,
}

impl ReferralMaturationSweep {
    pub fn new(
        store: Arc<dyn RecordStore>,
        referrals: Arc<ReferralProgram>,
        qualification_days: i64,
    ) -> Self {
        Self {
            ledger: SubscriptionLedger::new(store.clone()),
            store,
            referrals,
            qualification_days,
        }
    }

    /// One pass. Returns how many referrals were rewarded.
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let pending = Retry::spawn(retry_strategy(), || {
            self.referrals.list_by_status(ReferralStatus::Pending)
        })
        .await?;

        let now = OffsetDateTime::now_utc();
        let mut rewarded = 0;
        for referral in pending {
            if !motorlot_billing::matured(&referral, now, self.qualification_days) {
                continue;
            }
            match self.referred_is_in_good_standing(&referral).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = self
                        .referrals
                        .cancel(referral.id, "referred account churned in qualification window")
                        .await
                    {
                        tracing::error!(referral_id = %referral.id, error = %e, "Referral cancel failed");
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        referral_id = %referral.id,
                        error = %e,
                        "Could not verify referred account; skipping this cycle"
                    );
                    continue;
                }
            }

            let result = async {
                self.referrals.confirm(referral.id).await?;
                self.referrals.reward(referral.id).await
            }
            .await;
            match result {
                Ok(granted) if !granted.is_empty() => rewarded += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        referral_id = %referral.id,
                        error = %e,
                        "Referral maturation failed; continuing"
                    );
                }
            }
        }

        // Referrals confirmed in an earlier cycle that died before reward
        let confirmed = self.referrals.list_by_status(ReferralStatus::Confirmed).await?;
        for referral in confirmed {
            match self.referrals.reward(referral.id).await {
                Ok(granted) if !granted.is_empty() => rewarded += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        referral_id = %referral.id,
                        error = %e,
                        "Deferred referral reward failed; continuing"
                    );
                }
            }
        }

        if rewarded > 0 {
            tracing::info!(rewarded, "Referral sweep rewarded referrals");
        }
        Ok(rewarded)
    }

    /// A referral only qualifies while the referred account still holds an
    /// entitlement-granting subscription.
    async fn referred_is_in_good_standing(
        &self,
        referral: &motorlot_shared::Referral,
    ) -> anyhow::Result<bool> {
        let Some(doc) = self
            .store
            .get(collections::USERS, &referral.referred_id.to_string())
            .await?
        else {
            return Ok(false);
        };
        let user: User = decode(doc)?;
        let Some(subscription) = self.ledger.subscription_for_tenant(user.tenant_id).await? else {
            return Ok(false);
        };
        Ok(subscription.grants_entitlements(OffsetDateTime::now_utc()))
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "Referral sweep cycle failed");
                }
            }
        })
    }
}

/// Drops expired entries from the entitlement cache
pub fn spawn_cache_cleanup(
    cache: Arc<dyn EntitlementCache>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            cache.cleanup();
        }
    })
}
