//! Notification dispatch seam
//!
//! The engine only decides *that* a notification should fire; delivery
//! (email, SMS, WhatsApp) belongs to an external collaborator behind this
//! trait. Dispatch is fire-and-forget from the engine's point of view.

use std::sync::Mutex;

use motorlot_shared::{PlanId, TenantId, UserId};

/// Notifications the engine can decide to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AccountSuspended { tenant_id: TenantId },
    AccountReactivated { tenant_id: TenantId },
    MembershipChanged { tenant_id: TenantId, plan_id: PlanId },
    PaymentFailed { tenant_id: TenantId },
    ReferralRewarded { user_id: UserId },
}

pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: Notification);
}

/// Dispatcher that drops everything (default for embedders without a
/// delivery channel wired up)
pub struct NoopDispatcher;

impl NotificationDispatcher for NoopDispatcher {
    fn dispatch(&self, notification: Notification) {
        tracing::debug!(?notification, "Notification dropped (no dispatcher wired)");
    }
}

/// Dispatcher that records everything, for tests and dry runs
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}
