//! Small in-process TTL caches for write-time snapshot resolution.
//!
//! Advisory only: every lookup falls through to the database on a miss, so
//! correctness never depends on cache contents.

use crate::models::{Meter, Subscription, SubscriptionItem};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory map with per-entry TTLs. Reads take the shared lock; expired
/// entries are dropped lazily on access.
pub struct TtlCache<K, V> {
    items: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        {
            let items = self.items.read().expect("cache lock poisoned");
            match items.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop under the write lock.
        self.items.write().expect("cache lock poisoned").remove(key);
        None
    }

    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.items
            .write()
            .expect("cache lock poisoned")
            .insert(key, entry);
    }

    pub fn delete(&self, key: &K) {
        self.items.write().expect("cache lock poisoned").remove(key);
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Read-through caches used by ingestion to capture best-effort snapshots.
/// Keys are scoped so one org can never observe another's entries.
pub struct ResolverCache {
    ttl: Duration,
    meters: TtlCache<(i64, String), Option<Meter>>,
    subscriptions: TtlCache<(i64, i64), Option<Subscription>>,
    items: TtlCache<(i64, i64), Option<SubscriptionItem>>,
}

impl ResolverCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            meters: TtlCache::new(),
            subscriptions: TtlCache::new(),
            items: TtlCache::new(),
        }
    }

    pub fn get_meter(&self, org_id: i64, code: &str) -> Option<Option<Meter>> {
        self.meters.get(&(org_id, code.to_string()))
    }

    pub fn set_meter(&self, org_id: i64, code: &str, meter: Option<Meter>) {
        self.meters.set((org_id, code.to_string()), meter, self.ttl);
    }

    pub fn get_active_subscription(
        &self,
        org_id: i64,
        customer_id: i64,
    ) -> Option<Option<Subscription>> {
        self.subscriptions.get(&(org_id, customer_id))
    }

    pub fn set_active_subscription(
        &self,
        org_id: i64,
        customer_id: i64,
        subscription: Option<Subscription>,
    ) {
        self.subscriptions
            .set((org_id, customer_id), subscription, self.ttl);
    }

    pub fn get_subscription_item(
        &self,
        subscription_id: i64,
        meter_id: i64,
    ) -> Option<Option<SubscriptionItem>> {
        self.items.get(&(subscription_id, meter_id))
    }

    pub fn set_subscription_item(
        &self,
        subscription_id: i64,
        meter_id: i64,
        item: Option<SubscriptionItem>,
    ) {
        self.items.set((subscription_id, meter_id), item, self.ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_cached_value_before_expiry() {
        let cache: TtlCache<&str, i64> = TtlCache::new();
        cache.set("a", 1, Duration::from_secs(60));
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[test]
    fn expires_entries_after_ttl() {
        let cache: TtlCache<&str, i64> = TtlCache::new();
        cache.set("a", 1, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn delete_removes_entries() {
        let cache: TtlCache<&str, i64> = TtlCache::new();
        cache.set("a", 1, Duration::from_secs(60));
        cache.delete(&"a");
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn resolver_cache_distinguishes_miss_from_negative_hit() {
        let cache = ResolverCache::new(Duration::from_secs(60));
        assert!(cache.get_meter(1, "api_calls").is_none());
        cache.set_meter(1, "api_calls", None);
        // A cached negative lookup is a hit with no meter.
        assert!(matches!(cache.get_meter(1, "api_calls"), Some(None)));
        assert!(cache.get_meter(2, "api_calls").is_none());
    }
}
