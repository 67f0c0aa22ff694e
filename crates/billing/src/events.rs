//! Billing Events Module
//!
//! Append-only billing event log for audit trails and debugging. Events
//! answer "why is this tenant in this state?" questions and reconstruct
//! billing history. Logging is best-effort: a failed write is logged and
//! never fails the operation that produced the event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use motorlot_shared::{collections, RecordStore, TenantId};

/// Types of billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventType {
    SubscriptionCreated,
    SubscriptionTransitioned,
    MembershipChanged,
    PaymentSucceeded,
    PaymentFailed,
    CreditGranted,
    CreditConsumed,
    ReferralCreated,
    ReferralConfirmed,
    ReferralRewarded,
    ReferralCancelled,
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillingEventType::SubscriptionCreated => "SUBSCRIPTION_CREATED",
            BillingEventType::SubscriptionTransitioned => "SUBSCRIPTION_TRANSITIONED",
            BillingEventType::MembershipChanged => "MEMBERSHIP_CHANGED",
            BillingEventType::PaymentSucceeded => "PAYMENT_SUCCEEDED",
            BillingEventType::PaymentFailed => "PAYMENT_FAILED",
            BillingEventType::CreditGranted => "CREDIT_GRANTED",
            BillingEventType::CreditConsumed => "CREDIT_CONSUMED",
            BillingEventType::ReferralCreated => "REFERRAL_CREATED",
            BillingEventType::ReferralConfirmed => "REFERRAL_CONFIRMED",
            BillingEventType::ReferralRewarded => "REFERRAL_REWARDED",
            BillingEventType::ReferralCancelled => "REFERRAL_CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    /// End user through UI
    User,
    /// Admin user
    Admin,
    /// System automation (sweeps, maturation)
    System,
    /// Payment gateway event
    Gateway,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::Admin => write!(f, "admin"),
            ActorType::System => write!(f, "system"),
            ActorType::Gateway => write!(f, "gateway"),
        }
    }
}

/// Append-only billing event writer
#[derive(Clone)]
pub struct BillingEventLogger {
    store: Arc<dyn RecordStore>,
}

impl BillingEventLogger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Record an event. Best-effort: failures are logged, never raised.
    pub async fn log(
        &self,
        event_type: BillingEventType,
        actor: ActorType,
        tenant_id: Option<TenantId>,
        subject_id: &str,
        detail: Value,
    ) {
        let id = Uuid::new_v4().to_string();
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let event = serde_json::json!({
            "id": id,
            "event_type": event_type.to_string(),
            "actor": actor.to_string(),
            "tenant_id": tenant_id.map(|t| t.to_string()),
            "subject_id": subject_id,
            "detail": detail,
            "created_at": created_at,
        });
        if let Err(e) = self.store.set(collections::BILLING_EVENTS, &id, event).await {
            tracing::warn!(
                event_type = %event_type,
                subject_id = subject_id,
                error = %e,
                "Failed to write billing event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_display() {
        assert_eq!(
            BillingEventType::SubscriptionTransitioned.to_string(),
            "SUBSCRIPTION_TRANSITIONED"
        );
        assert_eq!(BillingEventType::CreditConsumed.to_string(), "CREDIT_CONSUMED");
    }

    #[test]
    fn test_actor_display() {
        assert_eq!(ActorType::Gateway.to_string(), "gateway");
        assert_eq!(ActorType::System.to_string(), "system");
    }
}
