//! Engine configuration

use std::env;
use std::time::Duration;

/// Tunables for the entitlement and subscription engine, loaded from
/// environment variables with production defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL of cached effective entitlement sets
    pub entitlement_cache_ttl: Duration,
    /// Days a subscription may stay past_due before the sweep suspends it
    pub past_due_grace_days: i64,
    /// Validity window of a reward credit, counted from use (not grant)
    pub credit_content_days: i64,
    /// Days a referral must survive without cancellation before confirmation
    pub referral_qualification_days: i64,
    /// Trial length for new subscriptions
    pub trial_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entitlement_cache_ttl: Duration::from_secs(3600),
            past_due_grace_days: 7,
            credit_content_days: 7,
            referral_qualification_days: 14,
            trial_days: 14,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            entitlement_cache_ttl: Duration::from_secs(parse_env(
                "ENTITLEMENT_CACHE_TTL_SECS",
                defaults.entitlement_cache_ttl.as_secs(),
            )),
            past_due_grace_days: parse_env("PAST_DUE_GRACE_DAYS", defaults.past_due_grace_days),
            credit_content_days: parse_env("CREDIT_CONTENT_DAYS", defaults.credit_content_days),
            referral_qualification_days: parse_env(
                "REFERRAL_QUALIFICATION_DAYS",
                defaults.referral_qualification_days,
            ),
            trial_days: parse_env("TRIAL_DAYS", defaults.trial_days),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
