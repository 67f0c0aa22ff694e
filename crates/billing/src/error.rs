//! Billing error types

use thiserror::Error;

use motorlot_shared::{PlatformError, SubscriptionStatus};

/// Billing-specific errors
///
/// Write-path failures propagate to the caller, who owns retry and
/// compensation. Read-path degradation lives in the Entitlement Gate, not
/// here.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Referral not found: {0}")]
    ReferralNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Platform(err.into())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
