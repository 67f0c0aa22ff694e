//! Usage Counters
//!
//! Point-in-time counts of consumed resources per tenant. Each count is a
//! single read over the live collection; there is no transactional
//! guarantee against concurrent creation (accepted soft-limit design).

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use motorlot_shared::{
    collections, timestamp_value, Filter, PlatformError, PlatformResult, QuotaField, RecordStore,
    TenantId, UsageRecord,
};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Countable resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Sellers,
    Vehicles,
    Campaigns,
    Promotions,
    ApiCallsThisMonth,
    StorageMb,
}

impl ResourceKind {
    /// The resource counted against a quota field
    pub fn for_quota(field: QuotaField) -> ResourceKind {
        match field {
            QuotaField::MaxSellers => ResourceKind::Sellers,
            QuotaField::MaxVehicles => ResourceKind::Vehicles,
            QuotaField::MaxCampaigns => ResourceKind::Campaigns,
            QuotaField::MaxApiCallsMonth => ResourceKind::ApiCallsThisMonth,
            QuotaField::MaxStorageMb => ResourceKind::StorageMb,
        }
    }
}

/// Start of the current calendar month, UTC midnight. API call counting
/// resets implicitly by filtering on this boundary; there is no reset job.
pub fn month_start(now: OffsetDateTime) -> PlatformResult<OffsetDateTime> {
    now.replace_day(1)
        .map_err(|e| PlatformError::Internal(format!("month start: {}", e)))
        .map(|d| d.replace_time(time::Time::MIDNIGHT))
}

pub struct UsageCounters {
    store: Arc<dyn RecordStore>,
}

impl UsageCounters {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Current consumption of a resource for a tenant
    pub async fn count(&self, tenant_id: TenantId, kind: ResourceKind) -> PlatformResult<u64> {
        let tenant = Filter::eq("tenant_id", tenant_id.to_string());
        match kind {
            ResourceKind::Sellers => {
                let docs = self
                    .store
                    .query(
                        collections::SELLERS,
                        &[tenant, Filter::eq("status", "active")],
                        None,
                        None,
                    )
                    .await?;
                Ok(docs.len() as u64)
            }
            ResourceKind::Vehicles => {
                let docs = self
                    .store
                    .query(collections::VEHICLES, &[tenant], None, None)
                    .await?;
                Ok(docs.len() as u64)
            }
            ResourceKind::Campaigns => {
                let docs = self
                    .store
                    .query(
                        collections::CAMPAIGNS,
                        &[tenant, Filter::eq("is_active", true)],
                        None,
                        None,
                    )
                    .await?;
                Ok(docs.len() as u64)
            }
            ResourceKind::Promotions => {
                let docs = self
                    .store
                    .query(collections::PROMOTIONS, &[tenant], None, None)
                    .await?;
                Ok(docs.len() as u64)
            }
            ResourceKind::ApiCallsThisMonth => {
                let since = timestamp_value(month_start(OffsetDateTime::now_utc())?)?;
                let docs = self
                    .store
                    .query(
                        collections::USAGE_RECORDS,
                        &[tenant, Filter::gte("recorded_at", since)],
                        None,
                        None,
                    )
                    .await?;
                let total: i64 = docs
                    .iter()
                    .filter_map(|doc| doc.get("request_count").and_then(Value::as_i64))
                    .sum();
                Ok(total.max(0) as u64)
            }
            ResourceKind::StorageMb => {
                let docs = self
                    .store
                    .query(collections::STORED_DOCUMENTS, &[tenant], None, None)
                    .await?;
                let total_bytes: u64 = docs
                    .iter()
                    .filter_map(|doc| doc.get("size_bytes").and_then(Value::as_u64))
                    .sum();
                Ok(total_bytes.div_ceil(BYTES_PER_MB))
            }
        }
    }

    /// Append an API usage record for the current month's rolling count
    pub async fn record_api_usage(
        &self,
        tenant_id: TenantId,
        request_count: i64,
    ) -> PlatformResult<()> {
        let record = UsageRecord {
            id: Uuid::new_v4(),
            tenant_id,
            request_count,
            recorded_at: OffsetDateTime::now_utc(),
        };
        self.store
            .set(
                collections::USAGE_RECORDS,
                &record.id.to_string(),
                serde_json::to_value(&record)?,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motorlot_shared::MemoryStore;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn test_month_start() {
        let now = datetime!(2026-08-19 15:42:07 UTC);
        assert_eq!(month_start(now).unwrap(), datetime!(2026-08-01 0:00:00 UTC));
    }

    #[test]
    fn test_resource_for_quota() {
        assert_eq!(
            ResourceKind::for_quota(QuotaField::MaxSellers),
            ResourceKind::Sellers
        );
        assert_eq!(
            ResourceKind::for_quota(QuotaField::MaxStorageMb),
            ResourceKind::StorageMb
        );
    }

    #[tokio::test]
    async fn test_count_sellers_excludes_suspended() {
        let store = Arc::new(MemoryStore::new());
        let counters = UsageCounters::new(store.clone());
        let tenant = TenantId::new();

        for (id, status) in [("s1", "active"), ("s2", "active"), ("s3", "suspended")] {
            store
                .set(
                    collections::SELLERS,
                    id,
                    json!({"id": id, "tenant_id": tenant.to_string(), "status": status}),
                )
                .await
                .unwrap();
        }

        let count = counters.count(tenant, ResourceKind::Sellers).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_api_calls_filtered_by_month_boundary() {
        let store = Arc::new(MemoryStore::new());
        let counters = UsageCounters::new(store.clone());
        let tenant = TenantId::new();

        // Two records this month via the service, one stale record last month
        counters.record_api_usage(tenant, 10).await.unwrap();
        counters.record_api_usage(tenant, 5).await.unwrap();
        store
            .set(
                collections::USAGE_RECORDS,
                "old",
                json!({
                    "id": "old",
                    "tenant_id": tenant.to_string(),
                    "request_count": 100,
                    "recorded_at": "2020-01-15T00:00:00Z",
                }),
            )
            .await
            .unwrap();

        let count = counters
            .count(tenant, ResourceKind::ApiCallsThisMonth)
            .await
            .unwrap();
        assert_eq!(count, 15);
    }

    #[tokio::test]
    async fn test_storage_rounds_up_to_mb() {
        let store = Arc::new(MemoryStore::new());
        let counters = UsageCounters::new(store.clone());
        let tenant = TenantId::new();

        store
            .set(
                collections::STORED_DOCUMENTS,
                "d1",
                json!({"id": "d1", "tenant_id": tenant.to_string(), "size_bytes": 1}),
            )
            .await
            .unwrap();

        let count = counters
            .count(tenant, ResourceKind::StorageMb)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
