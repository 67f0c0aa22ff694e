//! Entitlement cache
//!
//! The resolver's cache is the one explicitly shared, mutable,
//! tenant-scoped piece of state in the engine. It is an injected policy:
//! the trait makes the TTL/staleness trade-off swappable and testable.
//! Concurrent refreshes of the same tenant race last-writer-wins; the lock
//! only guards the map, never a recompute.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use motorlot_shared::TenantId;

use crate::resolver::EffectiveEntitlementSet;

/// Default cache TTL (1 hour)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

pub trait EntitlementCache: Send + Sync {
    /// Get the cached set for a tenant, if present and not expired
    fn get(&self, tenant_id: &TenantId) -> Option<EffectiveEntitlementSet>;

    fn set(&self, set: EffectiveEntitlementSet);

    fn invalidate(&self, tenant_id: &TenantId);

    /// Batch invalidation, used when a plan mutation touches many tenants
    fn invalidate_many(&self, tenant_ids: &[TenantId]);

    /// Drop expired entries (called periodically for memory management)
    fn cleanup(&self);
}

struct CacheEntry {
    set: EffectiveEntitlementSet,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Thread-safe in-memory entitlement cache with TTL
pub struct MemoryEntitlementCache {
    entries: RwLock<HashMap<TenantId, CacheEntry>>,
    ttl: Duration,
}

impl Default for MemoryEntitlementCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEntitlementCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

impl EntitlementCache for MemoryEntitlementCache {
    fn get(&self, tenant_id: &TenantId) -> Option<EffectiveEntitlementSet> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(tenant_id)?;
        if entry.is_expired() {
            None
        } else {
            Some(entry.set.clone())
        }
    }

    fn set(&self, set: EffectiveEntitlementSet) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                set.tenant_id,
                CacheEntry {
                    set,
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
    }

    fn invalidate(&self, tenant_id: &TenantId) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(tenant_id);
        }
    }

    fn invalidate_many(&self, tenant_ids: &[TenantId]) {
        if let Ok(mut entries) = self.entries.write() {
            for tenant_id in tenant_ids {
                entries.remove(tenant_id);
            }
        }
    }

    fn cleanup(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, entry| !entry.is_expired());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use time::OffsetDateTime;

    fn set_for(tenant_id: TenantId) -> EffectiveEntitlementSet {
        EffectiveEntitlementSet::no_membership(tenant_id, OffsetDateTime::now_utc())
    }

    #[test]
    fn test_cache_get_set_invalidate() {
        let cache = MemoryEntitlementCache::new();
        let tenant = TenantId::new();

        assert!(cache.get(&tenant).is_none());

        cache.set(set_for(tenant));
        assert!(cache.get(&tenant).is_some());

        cache.invalidate(&tenant);
        assert!(cache.get(&tenant).is_none());
    }

    #[test]
    fn test_cache_expiration() {
        let cache = MemoryEntitlementCache::with_ttl(Duration::from_millis(50));
        let tenant = TenantId::new();

        cache.set(set_for(tenant));
        assert!(cache.get(&tenant).is_some());

        sleep(Duration::from_millis(60));
        assert!(cache.get(&tenant).is_none());
    }

    #[test]
    fn test_invalidate_many() {
        let cache = MemoryEntitlementCache::new();
        let a = TenantId::new();
        let b = TenantId::new();
        let c = TenantId::new();

        for tenant in [a, b, c] {
            cache.set(set_for(tenant));
        }
        cache.invalidate_many(&[a, b]);

        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_cleanup_drops_expired() {
        let cache = MemoryEntitlementCache::with_ttl(Duration::from_millis(10));
        let tenant = TenantId::new();
        cache.set(set_for(tenant));
        sleep(Duration::from_millis(20));
        cache.cleanup();
        assert!(cache.get(&tenant).is_none());
    }
}
