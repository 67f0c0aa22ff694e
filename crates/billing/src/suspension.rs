//! Seller Suspension Service
//!
//! Graceful degradation when a tenant moves to a plan with fewer allowed
//! sellers. Excess sellers are suspended newest first, never the owner,
//! and the owner can unsuspend sellers when slots open up again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use motorlot_shared::{
    collections, decode, Filter, Order, Plan, PlatformResult, QuotaField, RecordStore, Seller,
    TenantId, UserId,
};

use crate::cascade::{BatchOutcome, ItemResult};
use crate::error::{BillingError, BillingResult};

/// Preview of a downgrade's impact on a tenant's sellers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowngradeImpact {
    pub current_count: u64,
    pub new_limit: u64,
    pub excess_count: u64,
    pub sellers_to_suspend: Vec<SellerToSuspend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerToSuspend {
    pub seller_id: UserId,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

pub struct SellerSuspensionService {
    store: Arc<dyn RecordStore>,
}

impl SellerSuspensionService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn active_seller_count(&self, tenant_id: TenantId) -> BillingResult<u64> {
        let docs = self
            .store
            .query(
                collections::SELLERS,
                &[
                    Filter::eq("tenant_id", tenant_id.to_string()),
                    Filter::eq("status", "active"),
                ],
                None,
                None,
            )
            .await?;
        Ok(docs.len() as u64)
    }

    /// Which sellers would be suspended under `new_plan`, newest first,
    /// owner excluded. `None` when the plan is unlimited or roomy enough.
    pub async fn preview_downgrade(
        &self,
        tenant_id: TenantId,
        new_plan: &Plan,
    ) -> BillingResult<Option<DowngradeImpact>> {
        let Some(new_limit) = new_plan.features.quota(QuotaField::MaxSellers) else {
            return Ok(None);
        };
        let current_count = self.active_seller_count(tenant_id).await?;
        if current_count <= new_limit {
            return Ok(None);
        }
        let excess_count = current_count - new_limit;
        let sellers = self
            .sellers_to_suspend(tenant_id, excess_count as usize)
            .await?;
        Ok(Some(DowngradeImpact {
            current_count,
            new_limit,
            excess_count,
            sellers_to_suspend: sellers,
        }))
    }

    async fn sellers_to_suspend(
        &self,
        tenant_id: TenantId,
        excess: usize,
    ) -> BillingResult<Vec<SellerToSuspend>> {
        let docs = self
            .store
            .query(
                collections::SELLERS,
                &[
                    Filter::eq("tenant_id", tenant_id.to_string()),
                    Filter::eq("status", "active"),
                    Filter::eq("is_owner", false),
                ],
                Some(Order::desc("created_at")),
                Some(excess),
            )
            .await?;
        let sellers = docs
            .into_iter()
            .map(decode::<Seller>)
            .collect::<PlatformResult<Vec<_>>>()?;
        Ok(sellers
            .into_iter()
            .map(|s| SellerToSuspend {
                seller_id: s.id,
                email: s.email,
                joined_at: s.created_at,
            })
            .collect())
    }

    /// Suspend excess sellers after a downgrade takes effect. Best-effort
    /// per item, like every cascade.
    pub async fn suspend_excess(
        &self,
        tenant_id: TenantId,
        new_plan: &Plan,
        reason: &str,
    ) -> BillingResult<BatchOutcome> {
        let Some(impact) = self.preview_downgrade(tenant_id, new_plan).await? else {
            return Ok(BatchOutcome::default());
        };

        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let mut outcome = BatchOutcome::default();
        for seller in &impact.sellers_to_suspend {
            let id = seller.seller_id.to_string();
            let result = self
                .store
                .update(
                    collections::SELLERS,
                    &id,
                    json!({
                        "status": "suspended",
                        "suspended_at": now,
                        "suspended_reason": reason,
                    }),
                )
                .await;
            match result {
                Ok(()) => outcome.items.push(ItemResult {
                    id,
                    ok: true,
                    error: None,
                }),
                Err(e) => {
                    tracing::error!(
                        tenant_id = %tenant_id,
                        seller_id = %id,
                        error = %e,
                        "Failed to suspend seller; continuing"
                    );
                    outcome.items.push(ItemResult {
                        id,
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        tracing::info!(
            tenant_id = %tenant_id,
            suspended = outcome.succeeded(),
            failed = outcome.failed(),
            reason = reason,
            "Suspended excess sellers after downgrade"
        );
        Ok(outcome)
    }

    /// Unsuspend one seller, if the tenant's plan has room
    pub async fn unsuspend(
        &self,
        tenant_id: TenantId,
        seller_id: UserId,
        plan: &Plan,
    ) -> BillingResult<()> {
        if let Some(limit) = plan.features.quota(QuotaField::MaxSellers) {
            let active = self.active_seller_count(tenant_id).await?;
            if active >= limit {
                return Err(BillingError::InvalidInput(format!(
                    "cannot unsuspend seller: limit reached ({}/{})",
                    active, limit
                )));
            }
        }
        let restored = self
            .store
            .update_if(
                collections::SELLERS,
                &seller_id.to_string(),
                "status",
                &json!("suspended"),
                json!({"status": "active", "suspended_at": null, "suspended_reason": null}),
            )
            .await?;
        if !restored {
            return Err(BillingError::InvalidInput(format!(
                "seller {} is not suspended",
                seller_id
            )));
        }
        tracing::info!(tenant_id = %tenant_id, seller_id = %seller_id, "Unsuspended seller");
        Ok(())
    }
}
