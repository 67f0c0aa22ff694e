//! Best-effort cascade fan-out
//!
//! State transitions ripple to every dependent resource of a tenant. Each
//! item is handled independently: a failure is captured in the batch
//! outcome and logged, and never aborts the rest. Nothing here rolls back
//! items already completed.

use std::sync::Arc;

use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use motorlot_shared::{collections, Filter, PlatformResult, RecordStore, TenantId};

/// Outcome of one item in a fan-out batch
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub id: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Outcome of a whole fan-out, with per-item results so callers can
/// observe partial failure instead of digging through logs.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub items: Vec<ItemResult>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| !i.ok).count()
    }
}

async fn update_each(
    store: &Arc<dyn RecordStore>,
    collection: &str,
    ids: Vec<String>,
    fields: Value,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for id in ids {
        match store.update(collection, &id, fields.clone()).await {
            Ok(()) => outcome.items.push(ItemResult {
                id,
                ok: true,
                error: None,
            }),
            Err(e) => {
                tracing::error!(
                    collection = collection,
                    item_id = %id,
                    error = %e,
                    "Cascade item failed; continuing"
                );
                outcome.items.push(ItemResult {
                    id,
                    ok: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    outcome
}

async fn mailbox_ids(
    store: &Arc<dyn RecordStore>,
    tenant_id: TenantId,
    status: &str,
) -> PlatformResult<Vec<String>> {
    let docs = store
        .query(
            collections::MAILBOXES,
            &[
                Filter::eq("tenant_id", tenant_id.to_string()),
                Filter::eq("status", status),
            ],
            None,
            None,
        )
        .await?;
    Ok(docs
        .into_iter()
        .filter_map(|d| d.get("id").and_then(Value::as_str).map(str::to_string))
        .collect())
}

/// Suspend every active mailbox owned by the tenant
pub async fn suspend_mailboxes(
    store: &Arc<dyn RecordStore>,
    tenant_id: TenantId,
) -> PlatformResult<BatchOutcome> {
    let ids = mailbox_ids(store, tenant_id, "active").await?;
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let outcome = update_each(
        store,
        collections::MAILBOXES,
        ids,
        json!({"status": "suspended", "suspended_at": now}),
    )
    .await;
    tracing::info!(
        tenant_id = %tenant_id,
        suspended = outcome.succeeded(),
        failed = outcome.failed(),
        "Cascade-suspended mailboxes"
    );
    Ok(outcome)
}

/// Reactivate every suspended mailbox owned by the tenant
pub async fn reactivate_mailboxes(
    store: &Arc<dyn RecordStore>,
    tenant_id: TenantId,
) -> PlatformResult<BatchOutcome> {
    let ids = mailbox_ids(store, tenant_id, "suspended").await?;
    let outcome = update_each(
        store,
        collections::MAILBOXES,
        ids,
        json!({"status": "active", "suspended_at": null}),
    )
    .await;
    tracing::info!(
        tenant_id = %tenant_id,
        reactivated = outcome.succeeded(),
        failed = outcome.failed(),
        "Cascade-reactivated mailboxes"
    );
    Ok(outcome)
}

/// Propagate a membership change to every user record under the tenant
pub async fn propagate_membership(
    store: &Arc<dyn RecordStore>,
    tenant_id: TenantId,
    membership_id: &str,
) -> PlatformResult<BatchOutcome> {
    let docs = store
        .query(
            collections::USERS,
            &[Filter::eq("tenant_id", tenant_id.to_string())],
            None,
            None,
        )
        .await?;
    let ids: Vec<String> = docs
        .into_iter()
        .filter_map(|d| d.get("id").and_then(Value::as_str).map(str::to_string))
        .collect();
    let outcome = update_each(
        store,
        collections::USERS,
        ids,
        json!({"membership_id": membership_id}),
    )
    .await;
    tracing::info!(
        tenant_id = %tenant_id,
        updated = outcome.succeeded(),
        failed = outcome.failed(),
        "Propagated membership change to users"
    );
    Ok(outcome)
}
