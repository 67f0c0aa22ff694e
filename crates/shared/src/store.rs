//! Record Store interface
//!
//! The persistent document store is an external collaborator. The core
//! only ever talks to it through this narrow interface: point reads,
//! filtered queries, merge writes, a conditional write, and a numeric
//! increment. Adapters for a concrete store live outside this repository;
//! [`MemoryStore`] is the bundled concurrent implementation used by tests
//! and embedders.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{PlatformError, PlatformResult};

/// Collection names used by the engine
pub mod collections {
    pub const PLANS: &str = "plans";
    pub const DYNAMIC_FEATURES: &str = "dynamic_features";
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    pub const TENANTS: &str = "tenants";
    pub const USERS: &str = "users";
    pub const SELLERS: &str = "sellers";
    pub const VEHICLES: &str = "vehicles";
    pub const CAMPAIGNS: &str = "campaigns";
    pub const PROMOTIONS: &str = "promotions";
    pub const STORED_DOCUMENTS: &str = "stored_documents";
    pub const USAGE_RECORDS: &str = "usage_records";
    pub const MAILBOXES: &str = "mailboxes";
    pub const REWARD_CREDITS: &str = "reward_credits";
    pub const REFERRALS: &str = "referrals";
    pub const REWARD_CONFIGS: &str = "reward_configs";
    pub const BILLING_EVENTS: &str = "billing_events";
    pub const GATE_EVENTS: &str = "gate_events";
}

/// Comparison operator for a query filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A single top-level field predicate
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Ne, value)
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gte, value)
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lt, value)
    }
}

/// Result ordering for a query
#[derive(Debug, Clone)]
pub struct Order {
    pub field: String,
    pub descending: bool,
}

impl Order {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }
}

/// Narrow document-store interface (spec of the external collaborator).
///
/// Documents are JSON objects carrying their own `id` field. `update` is a
/// shallow field merge. `update_if` is the single conditional-write
/// primitive: merge `fields` only if `field == expected`, reporting whether
/// the write happened. Timestamps are stored as RFC 3339 strings so range
/// filters order chronologically.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> PlatformResult<Option<Value>>;

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<Order>,
        limit: Option<usize>,
    ) -> PlatformResult<Vec<Value>>;

    async fn set(&self, collection: &str, id: &str, doc: Value) -> PlatformResult<()>;

    async fn update(&self, collection: &str, id: &str, fields: Value) -> PlatformResult<()>;

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
        fields: Value,
    ) -> PlatformResult<bool>;

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> PlatformResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> PlatformResult<()>;
}

/// Decode a stored document into a typed model
pub fn decode<T: DeserializeOwned>(doc: Value) -> PlatformResult<T> {
    serde_json::from_value(doc)
        .map_err(|e| PlatformError::Store(format!("malformed document: {}", e)))
}

/// Encode a timestamp the way the store expects it (RFC 3339 string)
pub fn timestamp_value(t: OffsetDateTime) -> PlatformResult<Value> {
    let s = t
        .format(&Rfc3339)
        .map_err(|e| PlatformError::Internal(format!("timestamp format failed: {}", e)))?;
    Ok(Value::String(s))
}

/// Compare two stored values. Strings that both parse as RFC 3339 compare
/// chronologically, so mixed subsecond precision cannot misorder them.
fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64()?;
            let y = y.as_f64()?;
            x.partial_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                OffsetDateTime::parse(x, &Rfc3339),
                OffsetDateTime::parse(y, &Rfc3339),
            ) {
                (Ok(tx), Ok(ty)) => Some(tx.cmp(&ty)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(std::cmp::Ordering::Equal),
        _ => None,
    }
}

fn matches(doc: &Value, filter: &Filter) -> bool {
    let field_value = doc.get(&filter.field).unwrap_or(&Value::Null);
    match filter.op {
        FilterOp::Eq => field_value == &filter.value,
        FilterOp::Ne => field_value != &filter.value,
        FilterOp::Gt => {
            compare_values(field_value, &filter.value) == Some(std::cmp::Ordering::Greater)
        }
        FilterOp::Gte => matches!(
            compare_values(field_value, &filter.value),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        FilterOp::Lt => {
            compare_values(field_value, &filter.value) == Some(std::cmp::Ordering::Less)
        }
        FilterOp::Lte => matches!(
            compare_values(field_value, &filter.value),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
    }
}

fn merge_fields(doc: &mut Value, fields: Value) -> PlatformResult<()> {
    let Value::Object(incoming) = fields else {
        return Err(PlatformError::InvalidValue(
            "update fields must be an object".to_string(),
        ));
    };
    let Value::Object(existing) = doc else {
        return Err(PlatformError::Store("document is not an object".to_string()));
    };
    for (k, v) in incoming {
        existing.insert(k, v);
    }
    Ok(())
}

/// Thread-safe in-memory record store
///
/// Collections are maps of id -> document. All mutation runs under a
/// single write lock, which is what makes `update_if` a real
/// check-and-set.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(
        &self,
    ) -> PlatformResult<std::sync::RwLockReadGuard<'_, HashMap<String, BTreeMap<String, Value>>>>
    {
        self.collections
            .read()
            .map_err(|_| PlatformError::Store("memory store lock poisoned".to_string()))
    }

    fn write_guard(
        &self,
    ) -> PlatformResult<std::sync::RwLockWriteGuard<'_, HashMap<String, BTreeMap<String, Value>>>>
    {
        self.collections
            .write()
            .map_err(|_| PlatformError::Store("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> PlatformResult<Option<Value>> {
        let guard = self.read_guard()?;
        Ok(guard.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<Order>,
        limit: Option<usize>,
    ) -> PlatformResult<Vec<Value>> {
        let guard = self.read_guard()?;
        let mut results: Vec<Value> = guard
            .get(collection)
            .map(|c| {
                c.values()
                    .filter(|doc| filters.iter().all(|f| matches(doc, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(guard);

        if let Some(order) = order {
            results.sort_by(|a, b| {
                let av = a.get(&order.field).unwrap_or(&Value::Null);
                let bv = b.get(&order.field).unwrap_or(&Value::Null);
                let ord = compare_values(av, bv).unwrap_or(std::cmp::Ordering::Equal);
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn set(&self, collection: &str, id: &str, doc: Value) -> PlatformResult<()> {
        let mut guard = self.write_guard()?;
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> PlatformResult<()> {
        let mut guard = self.write_guard()?;
        let doc = guard
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| PlatformError::NotFound(format!("{}/{}", collection, id)))?;
        merge_fields(doc, fields)
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
        fields: Value,
    ) -> PlatformResult<bool> {
        let mut guard = self.write_guard()?;
        let Some(doc) = guard.get_mut(collection).and_then(|c| c.get_mut(id)) else {
            return Ok(false);
        };
        if doc.get(field).unwrap_or(&Value::Null) != expected {
            return Ok(false);
        }
        merge_fields(doc, fields)?;
        Ok(true)
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> PlatformResult<()> {
        let mut guard = self.write_guard()?;
        let doc = guard
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| PlatformError::NotFound(format!("{}/{}", collection, id)))?;
        let current = doc.get(field).and_then(Value::as_i64).unwrap_or(0);
        let mut fields = serde_json::Map::new();
        fields.insert(field.to_string(), Value::from(current + delta));
        merge_fields(doc, Value::Object(fields))
    }

    async fn delete(&self, collection: &str, id: &str) -> PlatformResult<()> {
        let mut guard = self.write_guard()?;
        if let Some(c) = guard.get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }
}
