//! Referral program
//!
//! Referrals move pending -> confirmed (after a qualification window
//! without cancellation) -> rewarded (credits granted, terminal), or are
//! cancelled before being rewarded. Status moves use conditional writes so
//! overlapping maturation sweeps cannot confirm or reward twice.

use std::sync::Arc;

use serde_json::json;
use time::{Duration, OffsetDateTime};

use motorlot_shared::{
    collections, decode, timestamp_value, CreditSource, CreditType, Filter, MembershipTier,
    PlatformResult, RecordStore, Referral, ReferralId, ReferralStatus, RewardCredit, UserId,
    UserType,
};

use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventLogger, BillingEventType};
use crate::notifications::{Notification, NotificationDispatcher};
use crate::reward_config::RewardConfigTable;
use crate::rewards::RewardCreditLedger;

/// Whether a pending referral has survived its qualification window
pub fn matured(referral: &Referral, now: OffsetDateTime, qualification_days: i64) -> bool {
    referral.status == ReferralStatus::Pending
        && now >= referral.created_at + Duration::days(qualification_days)
}

pub struct ReferralProgram {
    store: Arc<dyn RecordStore>,
    rewards: Arc<RewardCreditLedger>,
    config_table: RewardConfigTable,
    notifier: Arc<dyn NotificationDispatcher>,
    events: BillingEventLogger,
    qualification_days: i64,
}

impl ReferralProgram {
    pub fn new(
        store: Arc<dyn RecordStore>,
        rewards: Arc<RewardCreditLedger>,
        notifier: Arc<dyn NotificationDispatcher>,
        qualification_days: i64,
    ) -> Self {
        Self {
            config_table: RewardConfigTable::new(store.clone()),
            events: BillingEventLogger::new(store.clone()),
            store,
            rewards,
            notifier,
            qualification_days,
        }
    }

    pub async fn create(
        &self,
        referrer_id: UserId,
        referred_id: UserId,
        user_type: UserType,
        membership_tier: MembershipTier,
    ) -> BillingResult<Referral> {
        let referral = Referral {
            id: ReferralId::new(),
            referrer_id,
            referred_id,
            membership_tier,
            user_type,
            status: ReferralStatus::Pending,
            confirmed_at: None,
            rewarded_at: None,
            cancelled_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.store
            .set(
                collections::REFERRALS,
                &referral.id.to_string(),
                serde_json::to_value(&referral)?,
            )
            .await?;
        self.events
            .log(
                BillingEventType::ReferralCreated,
                ActorType::User,
                None,
                &referral.id.to_string(),
                json!({
                    "referrer_id": referrer_id.to_string(),
                    "referred_id": referred_id.to_string(),
                }),
            )
            .await;
        Ok(referral)
    }

    pub async fn get(&self, referral_id: ReferralId) -> BillingResult<Referral> {
        let doc = self
            .store
            .get(collections::REFERRALS, &referral_id.to_string())
            .await?
            .ok_or_else(|| BillingError::ReferralNotFound(referral_id.to_string()))?;
        Ok(decode(doc)?)
    }

    pub async fn list_by_status(&self, status: ReferralStatus) -> BillingResult<Vec<Referral>> {
        let status_value = serde_json::to_value(status)?;
        let docs = self
            .store
            .query(
                collections::REFERRALS,
                &[Filter::new(
                    "status",
                    motorlot_shared::FilterOp::Eq,
                    status_value,
                )],
                None,
                None,
            )
            .await?;
        Ok(docs
            .into_iter()
            .map(decode)
            .collect::<PlatformResult<Vec<_>>>()?)
    }

    /// Confirm a pending referral that has survived its qualification
    /// window. Re-confirmation of an already confirmed referral is a
    /// no-op; rewarded/cancelled referrals reject.
    pub async fn confirm(&self, referral_id: ReferralId) -> BillingResult<Referral> {
        let referral = self.get(referral_id).await?;
        let now = OffsetDateTime::now_utc();
        match referral.status {
            ReferralStatus::Confirmed => return Ok(referral),
            ReferralStatus::Pending => {}
            status => {
                return Err(BillingError::InvalidInput(format!(
                    "referral {} is {:?}, cannot confirm",
                    referral_id, status
                )))
            }
        }
        if !matured(&referral, now, self.qualification_days) {
            return Err(BillingError::InvalidInput(format!(
                "referral {} has not finished its qualification window",
                referral_id
            )));
        }

        let claimed = self
            .store
            .update_if(
                collections::REFERRALS,
                &referral_id.to_string(),
                "status",
                &json!("pending"),
                json!({"status": "confirmed", "confirmed_at": timestamp_value(now)?}),
            )
            .await?;
        if claimed {
            self.events
                .log(
                    BillingEventType::ReferralConfirmed,
                    ActorType::System,
                    None,
                    &referral_id.to_string(),
                    json!({}),
                )
                .await;
        }
        self.get(referral_id).await
    }

    /// Reward a confirmed referral: grant the configured credit bundle to
    /// the referrer. The status flip is a conditional write, so the grant
    /// runs at most once even under overlapping sweeps.
    pub async fn reward(&self, referral_id: ReferralId) -> BillingResult<Vec<RewardCredit>> {
        let referral = self.get(referral_id).await?;
        match referral.status {
            ReferralStatus::Confirmed => {}
            ReferralStatus::Rewarded => return Ok(Vec::new()),
            status => {
                return Err(BillingError::InvalidInput(format!(
                    "referral {} is {:?}, cannot reward",
                    referral_id, status
                )))
            }
        }

        let now = OffsetDateTime::now_utc();
        let claimed = self
            .store
            .update_if(
                collections::REFERRALS,
                &referral_id.to_string(),
                "status",
                &json!("confirmed"),
                json!({"status": "rewarded", "rewarded_at": timestamp_value(now)?}),
            )
            .await?;
        if !claimed {
            // Lost the race to another sweep; nothing granted here
            return Ok(Vec::new());
        }

        let config = self
            .config_table
            .lookup(referral.user_type, referral.membership_tier)
            .await?;

        let mut granted = Vec::new();
        for _ in 0..config.promotion_credits {
            granted.push(
                self.rewards
                    .grant(
                        referral.referrer_id,
                        CreditType::Promotion,
                        CreditSource::Referral,
                        Some(referral_id),
                    )
                    .await?,
            );
        }
        for _ in 0..config.banner_credits {
            granted.push(
                self.rewards
                    .grant(
                        referral.referrer_id,
                        CreditType::Banner,
                        CreditSource::Referral,
                        Some(referral_id),
                    )
                    .await?,
            );
        }

        self.notifier.dispatch(Notification::ReferralRewarded {
            user_id: referral.referrer_id,
        });
        self.events
            .log(
                BillingEventType::ReferralRewarded,
                ActorType::System,
                None,
                &referral_id.to_string(),
                json!({
                    "config_version": config.version,
                    "promotion_credits": config.promotion_credits,
                    "banner_credits": config.banner_credits,
                    "free_months": config.free_months,
                    "discount_percent": config.discount_percent,
                }),
            )
            .await;

        tracing::info!(
            referral_id = %referral_id,
            referrer_id = %referral.referrer_id,
            granted = granted.len(),
            "Rewarded referral"
        );
        Ok(granted)
    }

    /// Cancel a referral before it is rewarded. Terminal; cancelling a
    /// cancelled referral is a no-op.
    pub async fn cancel(&self, referral_id: ReferralId, reason: &str) -> BillingResult<Referral> {
        let referral = self.get(referral_id).await?;
        match referral.status {
            ReferralStatus::Cancelled => return Ok(referral),
            ReferralStatus::Rewarded => {
                return Err(BillingError::InvalidInput(format!(
                    "referral {} was already rewarded",
                    referral_id
                )))
            }
            _ => {}
        }
        let now = OffsetDateTime::now_utc();
        let expected = serde_json::to_value(referral.status)?;
        self.store
            .update_if(
                collections::REFERRALS,
                &referral_id.to_string(),
                "status",
                &expected,
                json!({"status": "cancelled", "cancelled_at": timestamp_value(now)?}),
            )
            .await?;
        self.events
            .log(
                BillingEventType::ReferralCancelled,
                ActorType::System,
                None,
                &referral_id.to_string(),
                json!({"reason": reason}),
            )
            .await;
        self.get(referral_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matured_requires_window() {
        let now = OffsetDateTime::now_utc();
        let referral = Referral {
            id: ReferralId::new(),
            referrer_id: UserId::new(),
            referred_id: UserId::new(),
            membership_tier: MembershipTier::Premium,
            user_type: UserType::Seller,
            status: ReferralStatus::Pending,
            confirmed_at: None,
            rewarded_at: None,
            cancelled_at: None,
            created_at: now - Duration::days(10),
        };
        assert!(!matured(&referral, now, 14));
        assert!(matured(&referral, now, 7));

        let confirmed = Referral {
            status: ReferralStatus::Confirmed,
            ..referral
        };
        assert!(!matured(&confirmed, now, 7));
    }
}
