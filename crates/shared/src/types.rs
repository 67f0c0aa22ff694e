//! Common types used across Motorlot

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{PlatformError, PlatformResult};

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! id_wrapper {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_wrapper!(
    /// Tenant ID wrapper (a dealer or individual-seller account)
    TenantId
);
id_wrapper!(
    /// User ID wrapper
    UserId
);
id_wrapper!(
    /// Membership plan ID wrapper
    PlanId
);
id_wrapper!(
    /// Subscription ID wrapper
    SubscriptionId
);
id_wrapper!(
    /// Reward credit ID wrapper
    CreditId
);
id_wrapper!(
    /// Referral ID wrapper
    ReferralId
);
id_wrapper!(
    /// Provisioned mailbox ID wrapper
    MailboxId
);

// =============================================================================
// Enums
// =============================================================================

/// What kind of account a plan is sold to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Dealer,
    Seller,
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dealer => write!(f, "dealer"),
            Self::Seller => write!(f, "seller"),
        }
    }
}

/// Commercial tier of a membership plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipTier {
    Basic,
    Professional,
    Premium,
}

impl Default for MembershipTier {
    fn default() -> Self {
        Self::Basic
    }
}

impl std::fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Professional => write!(f, "professional"),
            Self::Premium => write!(f, "premium"),
        }
    }
}

impl std::str::FromStr for MembershipTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "professional" => Ok(Self::Professional),
            "premium" => Ok(Self::Premium),
            _ => Err(format!("Invalid membership tier: {}", s)),
        }
    }
}

/// Billing cycle for a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Annual,
}

impl Default for BillingCycle {
    fn default() -> Self {
        Self::Monthly
    }
}

/// Subscription status
///
/// Owned by the Subscription State Machine; other components only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Suspended,
    Cancelled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
}

impl SubscriptionStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::IncompleteExpired)
    }

    /// Statuses that grant entitlements on their own, with no extra
    /// read-time checks. Cancelled subscriptions may still grant via the
    /// period-end grace check on [`Subscription::grants_entitlements`].
    pub fn grants_entitlements(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Unpaid => "unpaid",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "suspended" => Ok(Self::Suspended),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "unpaid" => Ok(Self::Unpaid),
            "incomplete" => Ok(Self::Incomplete),
            "incomplete_expired" => Ok(Self::IncompleteExpired),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// Tenant status, flipped by subscription state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Cancelled,
}

impl Default for TenantStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Status of a corporate resource (provisioned mailbox)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxStatus {
    Active,
    Suspended,
}

/// Seller account status within a dealer tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SellerStatus {
    Active,
    Suspended,
}

/// User account type, used for reward configuration lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Dealer,
    Seller,
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dealer => write!(f, "dealer"),
            Self::Seller => write!(f, "seller"),
        }
    }
}

/// What a reward credit can be spent on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditType {
    Promotion,
    Banner,
}

impl std::fmt::Display for CreditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Promotion => write!(f, "promotion"),
            Self::Banner => write!(f, "banner"),
        }
    }
}

/// Where a reward credit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    Referral,
    AdminGrant,
    Promotion,
}

/// Lifecycle of a reward credit
///
/// A credit moves available -> used exactly once; `expires_at` is stamped
/// at use time, so an unused credit never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditStatus {
    Available,
    Used,
    Expired,
}

/// Referral lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Confirmed,
    Rewarded,
    Cancelled,
}

impl ReferralStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rewarded | Self::Cancelled)
    }
}

// =============================================================================
// Plan schema: quota and capability fields
// =============================================================================

/// Numeric quota fields of the plan schema.
///
/// A quota limit of `None` means unlimited; `Some(0)` means no allowance.
/// The two must never be conflated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QuotaField {
    MaxSellers,
    MaxVehicles,
    MaxCampaigns,
    MaxApiCallsMonth,
    MaxStorageMb,
}

impl QuotaField {
    pub const ALL: [QuotaField; 5] = [
        QuotaField::MaxSellers,
        QuotaField::MaxVehicles,
        QuotaField::MaxCampaigns,
        QuotaField::MaxApiCallsMonth,
        QuotaField::MaxStorageMb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxSellers => "max_sellers",
            Self::MaxVehicles => "max_vehicles",
            Self::MaxCampaigns => "max_campaigns",
            Self::MaxApiCallsMonth => "max_api_calls_month",
            Self::MaxStorageMb => "max_storage_mb",
        }
    }
}

impl std::fmt::Display for QuotaField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Boolean capability fields of the plan schema.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityField {
    AiDescriptions,
    CustomDomain,
    AdvancedReports,
    WhatsappIntegration,
    PrioritySupport,
}

impl CapabilityField {
    pub const ALL: [CapabilityField; 5] = [
        CapabilityField::AiDescriptions,
        CapabilityField::CustomDomain,
        CapabilityField::AdvancedReports,
        CapabilityField::WhatsappIntegration,
        CapabilityField::PrioritySupport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiDescriptions => "ai_descriptions",
            Self::CustomDomain => "custom_domain",
            Self::AdvancedReports => "advanced_reports",
            Self::WhatsappIntegration => "whatsapp_integration",
            Self::PrioritySupport => "priority_support",
        }
    }
}

impl std::fmt::Display for CapabilityField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The closed entitlement bundle carried by a plan.
///
/// `dynamic` holds per-plan values for administrator-defined features from
/// the Dynamic Feature Catalog, keyed by feature key. Keys not declared (or
/// no longer active) in the catalog are ignored at resolve time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanFeatures {
    pub max_sellers: Option<u32>,
    pub max_vehicles: Option<u32>,
    pub max_campaigns: Option<u32>,
    pub max_api_calls_month: Option<u64>,
    pub max_storage_mb: Option<u64>,
    pub ai_descriptions: bool,
    pub custom_domain: bool,
    pub advanced_reports: bool,
    pub whatsapp_integration: bool,
    pub priority_support: bool,
    #[serde(default)]
    pub dynamic: BTreeMap<String, serde_json::Value>,
}

impl PlanFeatures {
    /// Quota limit for a field, normalized to u64. `None` means unlimited.
    pub fn quota(&self, field: QuotaField) -> Option<u64> {
        match field {
            QuotaField::MaxSellers => self.max_sellers.map(u64::from),
            QuotaField::MaxVehicles => self.max_vehicles.map(u64::from),
            QuotaField::MaxCampaigns => self.max_campaigns.map(u64::from),
            QuotaField::MaxApiCallsMonth => self.max_api_calls_month,
            QuotaField::MaxStorageMb => self.max_storage_mb,
        }
    }

    pub fn capability(&self, field: CapabilityField) -> bool {
        match field {
            CapabilityField::AiDescriptions => self.ai_descriptions,
            CapabilityField::CustomDomain => self.custom_domain,
            CapabilityField::AdvancedReports => self.advanced_reports,
            CapabilityField::WhatsappIntegration => self.whatsapp_integration,
            CapabilityField::PrioritySupport => self.priority_support,
        }
    }
}

// =============================================================================
// Document Models
// =============================================================================

/// Membership plan. Immutable from the tenant's point of view; mutated only
/// by administrators, versioned via `sync_version`, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub plan_type: PlanType,
    pub tier: MembershipTier,
    pub price_cents: i64,
    pub billing_cycle: BillingCycle,
    pub features: PlanFeatures,
    pub is_active: bool,
    /// Incremented on every mutation; entitlement caches key off this.
    pub sync_version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Value type of a dynamic feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Bool,
    Number,
    String,
    Enum,
}

/// Administrator-defined feature declaration, extending the plan schema at
/// runtime. Soft-deleted via `is_active = false`; the key stays reserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicFeatureDefinition {
    pub key: String,
    pub feature_type: FeatureType,
    pub category: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default)]
    pub options: Vec<String>,
    pub default_value: Option<serde_json::Value>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Subscription record. Owned exclusively by the Subscription State
/// Machine; mutated only through state-transition operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub membership_id: PlanId,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_end: Option<OffsetDateTime>,
    pub days_past_due: i64,
    pub payment_failure_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_payment_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub suspended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reactivated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Whether this subscription grants entitlements at `now`.
    ///
    /// Cancelled subscriptions keep access until the end of the already
    /// paid period. This is the read-time grace check; there is no
    /// revocation job.
    pub fn grants_entitlements(&self, now: OffsetDateTime) -> bool {
        if self.status.grants_entitlements() {
            return true;
        }
        if self.status == SubscriptionStatus::Cancelled {
            return self.current_period_end.is_some_and(|end| now < end);
        }
        false
    }
}

/// Resolve "the" subscription for a tenant from all of its records.
///
/// At most one non-terminal subscription may exist per tenant; more than
/// one is a consistency violation, not a tie to break silently. With no
/// non-terminal record the most recent one wins (a freshly cancelled
/// subscription may still grant period-end grace).
pub fn pick_current_subscription(
    mut subs: Vec<Subscription>,
) -> PlatformResult<Option<Subscription>> {
    let non_terminal = subs.iter().filter(|s| !s.status.is_terminal()).count();
    if non_terminal > 1 {
        let tenant = subs
            .first()
            .map(|s| s.tenant_id.to_string())
            .unwrap_or_default();
        return Err(PlatformError::Consistency(format!(
            "tenant {} has {} non-terminal subscriptions",
            tenant, non_terminal
        )));
    }
    if non_terminal == 1 {
        return Ok(subs.into_iter().find(|s| !s.status.is_terminal()));
    }
    subs.sort_by_key(|s| s.created_at);
    Ok(subs.pop())
}

/// Tenant (dealer or individual-seller) account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub status: TenantStatus,
    pub membership_id: Option<PlanId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// User account under a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    pub user_type: UserType,
    pub membership_id: Option<PlanId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Seller account under a dealer tenant (a counted resource)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seller {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    pub is_owner: bool,
    pub status: SellerStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Inventory item (a counted resource)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub is_published: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Marketing campaign (a counted resource)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Stored document, counted in bytes against the storage quota
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub size_bytes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// API usage record, filtered on a rolling month-start boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub request_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Provisioned corporate mailbox, cascade-suspended with its tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: MailboxId,
    pub tenant_id: TenantId,
    pub address: String,
    pub status: MailboxStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub suspended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Referral-earned, single-use credit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardCredit {
    pub id: CreditId,
    pub user_id: UserId,
    pub credit_type: CreditType,
    pub source: CreditSource,
    pub status: CreditStatus,
    pub referral_id: Option<ReferralId>,
    /// Stamped at use time, never at grant time.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub used_at: Option<OffsetDateTime>,
    pub used_for: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Referral record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub id: ReferralId,
    pub referrer_id: UserId,
    pub referred_id: UserId,
    pub membership_tier: MembershipTier,
    pub user_type: UserType,
    pub status: ReferralStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub confirmed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub rewarded_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn subscription(status: SubscriptionStatus, created_at: OffsetDateTime) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            tenant_id: TenantId::new(),
            membership_id: PlanId::new(),
            status,
            current_period_start: None,
            current_period_end: None,
            trial_end: None,
            days_past_due: 0,
            payment_failure_count: 0,
            last_payment_date: None,
            suspended_at: None,
            reactivated_at: None,
            cancelled_at: None,
            cancel_at_period_end: false,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_subscription_status_display_and_parse() {
        assert_eq!(SubscriptionStatus::PastDue.to_string(), "past_due");
        assert_eq!(
            "past_due".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::PastDue
        );
        // US spelling is accepted on the way in
        assert_eq!(
            "canceled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Cancelled
        );
        assert!("limbo".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SubscriptionStatus::Cancelled.is_terminal());
        assert!(SubscriptionStatus::IncompleteExpired.is_terminal());
        assert!(!SubscriptionStatus::Suspended.is_terminal());
        assert!(!SubscriptionStatus::Unpaid.is_terminal());
    }

    #[test]
    fn test_grants_entitlements_active_and_trialing() {
        let now = OffsetDateTime::now_utc();
        assert!(subscription(SubscriptionStatus::Active, now).grants_entitlements(now));
        assert!(subscription(SubscriptionStatus::Trialing, now).grants_entitlements(now));
        assert!(!subscription(SubscriptionStatus::PastDue, now).grants_entitlements(now));
        assert!(!subscription(SubscriptionStatus::Suspended, now).grants_entitlements(now));
        assert!(!subscription(SubscriptionStatus::Unpaid, now).grants_entitlements(now));
    }

    #[test]
    fn test_cancelled_grace_until_period_end() {
        let now = OffsetDateTime::now_utc();
        let mut sub = subscription(SubscriptionStatus::Cancelled, now);

        // No period end recorded: no grace
        assert!(!sub.grants_entitlements(now));

        // Paid period still running: access remains
        sub.current_period_end = Some(now + Duration::days(10));
        assert!(sub.grants_entitlements(now));

        // Paid period over: access gone
        sub.current_period_end = Some(now - Duration::hours(1));
        assert!(!sub.grants_entitlements(now));
    }

    #[test]
    fn test_pick_current_prefers_non_terminal() {
        let now = OffsetDateTime::now_utc();
        let old_cancelled = subscription(SubscriptionStatus::Cancelled, now - Duration::days(60));
        let active = subscription(SubscriptionStatus::Active, now - Duration::days(5));
        let picked = pick_current_subscription(vec![old_cancelled, active.clone()])
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, active.id);
    }

    #[test]
    fn test_pick_current_falls_back_to_most_recent() {
        let now = OffsetDateTime::now_utc();
        let older = subscription(SubscriptionStatus::Cancelled, now - Duration::days(60));
        let newer = subscription(SubscriptionStatus::Cancelled, now - Duration::days(2));
        let picked = pick_current_subscription(vec![older, newer.clone()])
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, newer.id);
    }

    #[test]
    fn test_pick_current_rejects_duplicates() {
        let now = OffsetDateTime::now_utc();
        let a = subscription(SubscriptionStatus::Active, now);
        let b = subscription(SubscriptionStatus::PastDue, now);
        let err = pick_current_subscription(vec![a, b]).unwrap_err();
        assert!(matches!(err, PlatformError::Consistency(_)));
    }

    #[test]
    fn test_pick_current_empty() {
        assert!(pick_current_subscription(Vec::new()).unwrap().is_none());
    }

    #[test]
    fn test_plan_features_quota_distinguishes_zero_from_unlimited() {
        let features = PlanFeatures {
            max_sellers: Some(0),
            max_vehicles: None,
            ..Default::default()
        };
        assert_eq!(features.quota(QuotaField::MaxSellers), Some(0));
        assert_eq!(features.quota(QuotaField::MaxVehicles), None);
    }

    #[test]
    fn test_quota_field_names() {
        assert_eq!(QuotaField::MaxSellers.as_str(), "max_sellers");
        assert_eq!(CapabilityField::CustomDomain.as_str(), "custom_domain");
    }

    #[test]
    fn test_subscription_roundtrip() {
        let now = OffsetDateTime::now_utc();
        let mut sub = subscription(SubscriptionStatus::Active, now);
        sub.current_period_end = Some(now + Duration::days(30));
        let value = serde_json::to_value(&sub).unwrap();
        assert_eq!(value["status"], "active");
        let back: Subscription = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, sub.id);
        assert_eq!(back.current_period_end, sub.current_period_end);
    }
}
