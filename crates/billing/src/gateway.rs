//! Payment Gateway events
//!
//! The engine does not parse gateway payloads; it consumes normalized
//! lifecycle events and maps them onto state-machine transitions and
//! payment bookkeeping.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use motorlot_shared::{
    collections, timestamp_value, RecordStore, SubscriptionId, SubscriptionStatus,
};

use crate::error::BillingResult;
use crate::events::{ActorType, BillingEventLogger, BillingEventType};
use crate::notifications::{Notification, NotificationDispatcher};
use crate::state_machine::SubscriptionStateMachine;

/// Normalized subscription lifecycle event from the payment gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayEvent {
    StatusChanged {
        subscription_id: SubscriptionId,
        status: SubscriptionStatus,
        #[serde(with = "time::serde::rfc3339::option")]
        period_start: Option<OffsetDateTime>,
        #[serde(with = "time::serde::rfc3339::option")]
        period_end: Option<OffsetDateTime>,
    },
    PaymentSucceeded {
        subscription_id: SubscriptionId,
        #[serde(with = "time::serde::rfc3339")]
        paid_at: OffsetDateTime,
    },
    PaymentFailed {
        subscription_id: SubscriptionId,
        #[serde(with = "time::serde::rfc3339")]
        failed_at: OffsetDateTime,
    },
}

pub struct GatewayEventHandler {
    store: Arc<dyn RecordStore>,
    state_machine: Arc<SubscriptionStateMachine>,
    notifier: Arc<dyn NotificationDispatcher>,
    events: BillingEventLogger,
}

impl GatewayEventHandler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        state_machine: Arc<SubscriptionStateMachine>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            events: BillingEventLogger::new(store.clone()),
            store,
            state_machine,
            notifier,
        }
    }

    /// Apply one gateway event. Hard failure propagates to the caller,
    /// who owns retry (gateway deliveries are redelivered).
    pub async fn apply(&self, event: GatewayEvent) -> BillingResult<()> {
        match event {
            GatewayEvent::StatusChanged {
                subscription_id,
                status,
                period_start,
                period_end,
            } => {
                let mut fields = serde_json::Map::new();
                if let Some(start) = period_start {
                    fields.insert("current_period_start".into(), timestamp_value(start)?);
                }
                if let Some(end) = period_end {
                    fields.insert("current_period_end".into(), timestamp_value(end)?);
                }
                if !fields.is_empty() {
                    self.store
                        .update(
                            collections::SUBSCRIPTIONS,
                            &subscription_id.to_string(),
                            serde_json::Value::Object(fields),
                        )
                        .await?;
                }
                self.state_machine
                    .transition(subscription_id, status, "gateway status change")
                    .await?;
                Ok(())
            }
            GatewayEvent::PaymentSucceeded {
                subscription_id,
                paid_at,
            } => {
                let subscription = self.state_machine.ledger().get(subscription_id).await?;
                self.store
                    .update(
                        collections::SUBSCRIPTIONS,
                        &subscription_id.to_string(),
                        json!({
                            "last_payment_date": timestamp_value(paid_at)?,
                            "payment_failure_count": 0,
                            "days_past_due": 0,
                        }),
                    )
                    .await?;
                if matches!(
                    subscription.status,
                    SubscriptionStatus::PastDue
                        | SubscriptionStatus::Suspended
                        | SubscriptionStatus::Unpaid
                ) {
                    self.state_machine
                        .transition(subscription_id, SubscriptionStatus::Active, "payment recovered")
                        .await?;
                }
                self.events
                    .log(
                        BillingEventType::PaymentSucceeded,
                        ActorType::Gateway,
                        Some(subscription.tenant_id),
                        &subscription_id.to_string(),
                        json!({}),
                    )
                    .await;
                Ok(())
            }
            GatewayEvent::PaymentFailed {
                subscription_id,
                failed_at,
            } => {
                let subscription = self.state_machine.ledger().get(subscription_id).await?;
                self.store
                    .increment(
                        collections::SUBSCRIPTIONS,
                        &subscription_id.to_string(),
                        "payment_failure_count",
                        1,
                    )
                    .await?;
                if matches!(
                    subscription.status,
                    SubscriptionStatus::Active | SubscriptionStatus::Trialing
                ) {
                    self.state_machine
                        .transition(subscription_id, SubscriptionStatus::PastDue, "payment failed")
                        .await?;
                }
                self.notifier.dispatch(Notification::PaymentFailed {
                    tenant_id: subscription.tenant_id,
                });
                self.events
                    .log(
                        BillingEventType::PaymentFailed,
                        ActorType::Gateway,
                        Some(subscription.tenant_id),
                        &subscription_id.to_string(),
                        json!({"failed_at": failed_at.to_string()}),
                    )
                    .await;
                Ok(())
            }
        }
    }
}
