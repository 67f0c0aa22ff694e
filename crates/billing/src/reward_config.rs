//! Reward configuration
//!
//! Versioned table of reward units granted per confirmed referral, keyed
//! by `(user_type, membership_tier)`. Administrators can override the
//! built-in defaults; lookups take the highest version for a key and fall
//! back to the defaults when nothing is stored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use motorlot_shared::{
    collections, decode, Filter, MembershipTier, Order, PlatformResult, RecordStore, UserType,
};

/// Reward units granted when a referral for this key is rewarded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub user_type: UserType,
    pub tier: MembershipTier,
    pub version: i64,
    /// Percentage discount on the referrer's next invoice
    pub discount_percent: Option<u32>,
    pub free_months: u32,
    pub promotion_credits: u32,
    pub banner_credits: u32,
    /// Validity window of granted credits, counted from use
    pub content_days: i64,
}

impl RewardConfig {
    /// Built-in defaults per `(user_type, tier)`
    pub fn default_for(user_type: UserType, tier: MembershipTier) -> Self {
        let (discount_percent, free_months, promotion_credits, banner_credits) = match tier {
            MembershipTier::Basic => (Some(10), 0, 0, 0),
            MembershipTier::Professional => (None, 0, 1, 0),
            MembershipTier::Premium => (None, 1, 1, 1),
        };
        Self {
            user_type,
            tier,
            version: 0,
            discount_percent,
            free_months,
            promotion_credits,
            banner_credits,
            content_days: 7,
        }
    }
}

pub struct RewardConfigTable {
    store: Arc<dyn RecordStore>,
}

impl RewardConfigTable {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Current config for a key: highest stored version, else the default
    pub async fn lookup(
        &self,
        user_type: UserType,
        tier: MembershipTier,
    ) -> PlatformResult<RewardConfig> {
        let docs = self
            .store
            .query(
                collections::REWARD_CONFIGS,
                &[
                    Filter::eq("user_type", user_type.to_string()),
                    Filter::eq("tier", tier.to_string()),
                ],
                Some(Order::desc("version")),
                Some(1),
            )
            .await?;
        match docs.into_iter().next() {
            Some(doc) => decode(doc),
            None => Ok(RewardConfig::default_for(user_type, tier)),
        }
    }

    /// Store a new config version for its key
    pub async fn publish(&self, mut config: RewardConfig) -> PlatformResult<RewardConfig> {
        let current = self.lookup(config.user_type, config.tier).await?;
        config.version = current.version + 1;
        self.store
            .set(
                collections::REWARD_CONFIGS,
                &Uuid::new_v4().to_string(),
                serde_json::to_value(&config)?,
            )
            .await?;
        tracing::info!(
            user_type = %config.user_type,
            tier = %config.tier,
            version = config.version,
            "Published reward config"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motorlot_shared::MemoryStore;

    #[test]
    fn test_premium_seller_default() {
        let config = RewardConfig::default_for(UserType::Seller, MembershipTier::Premium);
        assert_eq!(config.promotion_credits, 1);
        assert_eq!(config.banner_credits, 1);
        assert_eq!(config.free_months, 1);
        assert_eq!(config.content_days, 7);
    }

    #[test]
    fn test_basic_default_is_discount_only() {
        let config = RewardConfig::default_for(UserType::Dealer, MembershipTier::Basic);
        assert_eq!(config.discount_percent, Some(10));
        assert_eq!(config.promotion_credits, 0);
        assert_eq!(config.banner_credits, 0);
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_default() {
        let table = RewardConfigTable::new(Arc::new(MemoryStore::new()));
        let config = table
            .lookup(UserType::Seller, MembershipTier::Premium)
            .await
            .unwrap();
        assert_eq!(config.version, 0);
        assert_eq!(config.banner_credits, 1);
    }

    #[tokio::test]
    async fn test_publish_bumps_version_and_wins_lookup() {
        let table = RewardConfigTable::new(Arc::new(MemoryStore::new()));

        let mut first = RewardConfig::default_for(UserType::Seller, MembershipTier::Premium);
        first.banner_credits = 3;
        let first = table.publish(first).await.unwrap();
        assert_eq!(first.version, 1);

        let mut second = first.clone();
        second.banner_credits = 5;
        let second = table.publish(second).await.unwrap();
        assert_eq!(second.version, 2);

        let looked_up = table
            .lookup(UserType::Seller, MembershipTier::Premium)
            .await
            .unwrap();
        assert_eq!(looked_up.version, 2);
        assert_eq!(looked_up.banner_credits, 5);

        // Other keys are untouched
        let other = table
            .lookup(UserType::Dealer, MembershipTier::Basic)
            .await
            .unwrap();
        assert_eq!(other.version, 0);
    }
}
