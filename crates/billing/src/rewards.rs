//! Reward Credit Ledger
//!
//! Referral-earned, single-use credits. A credit is consumed with a
//! conditional write on its status, so two racing consumers cannot both
//! succeed. The validity window starts at *use*: `expires_at` is stamped
//! when the credit is consumed, and an unused credit never expires.

use std::sync::Arc;

use serde_json::json;
use time::{Duration, OffsetDateTime};

use motorlot_shared::{
    collections, decode, timestamp_value, CreditId, CreditSource, CreditStatus, CreditType,
    Filter, PlatformResult, RecordStore, ReferralId, RewardCredit, UserId,
};

use crate::error::BillingResult;
use crate::events::{ActorType, BillingEventLogger, BillingEventType};

pub struct RewardCreditLedger {
    store: Arc<dyn RecordStore>,
    events: BillingEventLogger,
    content_days: i64,
}

impl RewardCreditLedger {
    pub fn new(store: Arc<dyn RecordStore>, content_days: i64) -> Self {
        Self {
            events: BillingEventLogger::new(store.clone()),
            store,
            content_days,
        }
    }

    /// Grant a credit. No expiry is set here; see [`Self::consume`].
    pub async fn grant(
        &self,
        user_id: UserId,
        credit_type: CreditType,
        source: CreditSource,
        referral_id: Option<ReferralId>,
    ) -> BillingResult<RewardCredit> {
        let credit = RewardCredit {
            id: CreditId::new(),
            user_id,
            credit_type,
            source,
            status: CreditStatus::Available,
            referral_id,
            expires_at: None,
            used_at: None,
            used_for: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.store
            .set(
                collections::REWARD_CREDITS,
                &credit.id.to_string(),
                serde_json::to_value(&credit)?,
            )
            .await?;
        self.events
            .log(
                BillingEventType::CreditGranted,
                ActorType::System,
                None,
                &credit.id.to_string(),
                json!({"user_id": user_id.to_string(), "credit_type": credit_type.to_string()}),
            )
            .await;
        tracing::info!(
            credit_id = %credit.id,
            user_id = %user_id,
            credit_type = %credit_type,
            "Granted reward credit"
        );
        Ok(credit)
    }

    /// Consume a credit for a gated resource.
    ///
    /// Returns `false` when the credit is missing, already used, or
    /// expired. That is a normal negative outcome, not an error; callers
    /// simply refuse the gated creation.
    pub async fn consume(&self, credit_id: CreditId, used_for: &str) -> BillingResult<bool> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now + Duration::days(self.content_days);
        let consumed = self
            .store
            .update_if(
                collections::REWARD_CREDITS,
                &credit_id.to_string(),
                "status",
                &json!("available"),
                json!({
                    "status": "used",
                    "used_at": timestamp_value(now)?,
                    "used_for": used_for,
                    "expires_at": timestamp_value(expires_at)?,
                }),
            )
            .await?;

        if consumed {
            self.events
                .log(
                    BillingEventType::CreditConsumed,
                    ActorType::User,
                    None,
                    &credit_id.to_string(),
                    json!({"used_for": used_for}),
                )
                .await;
            tracing::info!(credit_id = %credit_id, used_for = used_for, "Consumed reward credit");
        } else {
            tracing::debug!(
                credit_id = %credit_id,
                "Credit not consumable (missing, used, or expired)"
            );
        }
        Ok(consumed)
    }

    pub async fn get(&self, credit_id: CreditId) -> BillingResult<Option<RewardCredit>> {
        let doc = self
            .store
            .get(collections::REWARD_CREDITS, &credit_id.to_string())
            .await?;
        Ok(doc.map(decode).transpose()?)
    }

    /// Available credits for a user, optionally of one type
    pub async fn available_credits(
        &self,
        user_id: UserId,
        credit_type: Option<CreditType>,
    ) -> BillingResult<Vec<RewardCredit>> {
        let mut filters = vec![
            Filter::eq("user_id", user_id.to_string()),
            Filter::eq("status", "available"),
        ];
        if let Some(credit_type) = credit_type {
            filters.push(Filter::eq("credit_type", credit_type.to_string()));
        }
        let docs = self
            .store
            .query(collections::REWARD_CREDITS, &filters, None, None)
            .await?;
        Ok(docs
            .into_iter()
            .map(decode)
            .collect::<PlatformResult<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motorlot_shared::MemoryStore;

    fn ledger() -> RewardCreditLedger {
        RewardCreditLedger::new(Arc::new(MemoryStore::new()), 7)
    }

    #[tokio::test]
    async fn test_grant_has_no_expiry() {
        let ledger = ledger();
        let credit = ledger
            .grant(UserId::new(), CreditType::Banner, CreditSource::Referral, None)
            .await
            .unwrap();
        assert_eq!(credit.status, CreditStatus::Available);
        assert!(credit.expires_at.is_none());
        assert!(credit.used_at.is_none());
    }

    #[tokio::test]
    async fn test_consume_succeeds_exactly_once() {
        let ledger = ledger();
        let credit = ledger
            .grant(UserId::new(), CreditType::Promotion, CreditSource::Referral, None)
            .await
            .unwrap();

        assert!(ledger.consume(credit.id, "promotion:veh-1").await.unwrap());
        assert!(!ledger.consume(credit.id, "promotion:veh-2").await.unwrap());

        let stored = ledger.get(credit.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CreditStatus::Used);
        assert_eq!(stored.used_for.as_deref(), Some("promotion:veh-1"));
    }

    #[tokio::test]
    async fn test_consume_stamps_expiry_from_use_time() {
        let ledger = ledger();
        let credit = ledger
            .grant(UserId::new(), CreditType::Banner, CreditSource::Referral, None)
            .await
            .unwrap();

        let before = OffsetDateTime::now_utc();
        assert!(ledger.consume(credit.id, "banner:home").await.unwrap());
        let stored = ledger.get(credit.id).await.unwrap().unwrap();

        let used_at = stored.used_at.unwrap();
        let expires_at = stored.expires_at.unwrap();
        assert!(used_at >= before);
        assert_eq!(expires_at - used_at, Duration::days(7));
    }

    #[tokio::test]
    async fn test_consume_missing_credit_is_false_not_error() {
        let ledger = ledger();
        assert!(!ledger.consume(CreditId::new(), "banner:x").await.unwrap());
    }

    #[tokio::test]
    async fn test_available_credits_filters() {
        let ledger = ledger();
        let user = UserId::new();
        let banner = ledger
            .grant(user, CreditType::Banner, CreditSource::Referral, None)
            .await
            .unwrap();
        ledger
            .grant(user, CreditType::Promotion, CreditSource::AdminGrant, None)
            .await
            .unwrap();
        ledger
            .grant(UserId::new(), CreditType::Banner, CreditSource::Referral, None)
            .await
            .unwrap();

        let all = ledger.available_credits(user, None).await.unwrap();
        assert_eq!(all.len(), 2);

        ledger.consume(banner.id, "banner:a").await.unwrap();
        let banners = ledger
            .available_credits(user, Some(CreditType::Banner))
            .await
            .unwrap();
        assert!(banners.is_empty());
    }
}
