// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! In-memory tier implementation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use strata_tier::{
    CacheEntry, CacheError, KeyPattern, Result, TierDescriptor, TierKind, TierStore,
    policy::{VictimCandidate, select_victims},
};

/// Charged per slot on top of key and serialized-value size, covering
/// entry metadata and map bookkeeping.
const SLOT_OVERHEAD_BYTES: u64 = 96;

/// Byte estimate used when a value refuses to serialize; capacity
/// accounting must never fail a write on its own.
const FALLBACK_VALUE_BYTES: u64 = 256;

struct Slot<V> {
    entry: CacheEntry<V>,
    bytes: u64,
}

/// The volatile tier: typed entries in sharded process memory.
///
/// Capacity is enforced before each write. When the entry-count or byte
/// ceiling would be breached, resident entries are ranked by
/// `(priority asc, last_accessed asc)` and the lowest-ranked batch is
/// evicted. Victims touched after the candidate snapshot are skipped at
/// removal time, so a concurrent reader keeps its entry.
///
/// Concurrent writers may each transiently overshoot a ceiling by one
/// entry; the next write corrects it. This is the documented snapshot
/// consistency rule; strict non-overshoot would serialize all writers
/// behind one lock.
pub struct VolatileTier<V> {
    slots: DashMap<String, Slot<V>>,
    bytes_used: AtomicU64,
    max_entries: u64,
    max_bytes: u64,
    ttl_override: Option<Duration>,
}

impl<V> VolatileTier<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    /// Builds the tier from its descriptor.
    #[must_use]
    pub fn new(desc: &TierDescriptor) -> Self {
        debug_assert_eq!(desc.kind, TierKind::Volatile);
        Self {
            slots: DashMap::new(),
            bytes_used: AtomicU64::new(0),
            max_entries: desc.max_entries.max(1),
            max_bytes: desc.max_bytes.max(1),
            ttl_override: desc.ttl_override,
        }
    }

    fn estimate_bytes(key: &str, value: &V) -> u64 {
        let value_bytes = bincode::serialized_size(value).unwrap_or(FALLBACK_VALUE_BYTES);
        key.len() as u64 + value_bytes + SLOT_OVERHEAD_BYTES
    }

    fn remove_slot(&self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some((_, slot)) => {
                self.bytes_used.fetch_sub(slot.bytes, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Evicts lower-ranked residents until the incoming write fits.
    /// Returns the number of entries removed.
    fn make_room(&self, incoming_key: &str, incoming_bytes: u64) -> u64 {
        // Slot bytes are always positive, so a zero here means a new key.
        let replaced_bytes = self.slots.get(incoming_key).map_or(0, |slot| slot.bytes);

        let projected_entries = self.slots.len() as u64 + u64::from(replaced_bytes == 0);
        let projected_bytes = self.bytes_used.load(Ordering::Relaxed) + incoming_bytes - replaced_bytes;

        let over_count = projected_entries > self.max_entries;
        let over_bytes = projected_bytes > self.max_bytes;
        if !over_count && !over_bytes {
            return 0;
        }

        let snapshot_at = SystemTime::now();
        let candidates: Vec<VictimCandidate> = self
            .slots
            .iter()
            .filter(|slot| slot.key() != incoming_key)
            .map(|slot| VictimCandidate {
                key: slot.key().clone(),
                priority: slot.entry.priority(),
                last_accessed_at: slot.entry.last_accessed_at(),
                bytes: slot.bytes,
            })
            .collect();

        let mut evicted = 0;
        for victim in select_victims(candidates, over_count, over_bytes) {
            // Just-in-time recency check: skip entries touched after the
            // snapshot was taken.
            let removed = self
                .slots
                .remove_if(&victim.key, |_, slot| slot.entry.last_accessed_at() <= snapshot_at);
            if let Some((key, slot)) = removed {
                self.bytes_used.fetch_sub(slot.bytes, Ordering::Relaxed);
                evicted += 1;
                tracing::debug!(
                    target: "strata",
                    key = %key,
                    priority = ?slot.entry.priority(),
                    "cache.evict"
                );
            }
        }
        evicted
    }
}

#[async_trait]
impl<V> TierStore<V> for VolatileTier<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    fn kind(&self) -> TierKind {
        TierKind::Volatile
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        // The guard must drop before the expired slot is removed.
        if let Some(mut slot) = self.slots.get_mut(key) {
            if !slot.entry.is_expired() {
                slot.entry.touch();
                return Ok(Some(slot.entry.clone()));
            }
        } else {
            return Ok(None);
        }
        self.remove_slot(key);
        Ok(None)
    }

    async fn put(&self, key: &str, mut entry: CacheEntry<V>) -> Result<u64> {
        if let Some(ttl) = self.ttl_override {
            entry.clamp_expiry(entry.created_at() + ttl);
        }

        let bytes = Self::estimate_bytes(key, entry.value());
        if bytes > self.max_bytes {
            return Err(CacheError::CapacityExceeded {
                tier: TierKind::Volatile,
            });
        }

        let evicted = self.make_room(key, bytes);

        match self.slots.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let old_bytes = occupied.get().bytes;
                occupied.insert(Slot { entry, bytes });
                self.bytes_used.fetch_sub(old_bytes, Ordering::Relaxed);
                self.bytes_used.fetch_add(bytes, Ordering::Relaxed);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Slot { entry, bytes });
                self.bytes_used.fetch_add(bytes, Ordering::Relaxed);
            }
        }
        Ok(evicted)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.remove_slot(key))
    }

    async fn scan_keys(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        Ok(self
            .slots
            .iter()
            .filter(|slot| pattern.matches(slot.key()))
            .map(|slot| slot.key().clone())
            .collect())
    }

    async fn purge_expired(&self, now: SystemTime) -> Result<u64> {
        let mut purged = 0;
        self.slots.retain(|_, slot| {
            if slot.entry.is_expired_at(now) {
                self.bytes_used.fetch_sub(slot.bytes, Ordering::Relaxed);
                purged += 1;
                false
            } else {
                true
            }
        });
        Ok(purged)
    }

    async fn clear(&self) -> Result<()> {
        self.slots.retain(|_, slot| {
            self.bytes_used.fetch_sub(slot.bytes, Ordering::Relaxed);
            false
        });
        Ok(())
    }

    fn len(&self) -> u64 {
        self.slots.len() as u64
    }

    fn bytes_used(&self) -> u64 {
        self.bytes_used.load(Ordering::Relaxed)
    }
}

impl<V> fmt::Debug for VolatileTier<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolatileTier")
            .field("entries", &self.slots.len())
            .field("bytes_used", &self.bytes_used.load(Ordering::Relaxed))
            .field("max_entries", &self.max_entries)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_tier::Priority;

    fn tier(max_entries: u64) -> VolatileTier<String> {
        VolatileTier::new(&TierDescriptor::volatile(max_entries, 64 * 1024 * 1024))
    }

    fn entry(value: &str, priority: Priority) -> CacheEntry<String> {
        CacheEntry::with_priority(value.to_string(), Duration::from_secs(300), priority)
    }

    #[tokio::test]
    async fn get_missing_key_is_absent() {
        let tier = tier(16);
        assert!(tier.get("nope").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let tier = tier(16);
        tier.put("k", entry("v", Priority::Medium)).await.expect("put");
        let hit = tier.get("k").await.expect("get").expect("hit");
        assert_eq!(hit.value(), "v");
        assert_eq!(tier.len(), 1);
        assert!(tier.bytes_used() > 0);
    }

    #[tokio::test]
    async fn get_touches_access_metadata() {
        let tier = tier(16);
        tier.put("k", entry("v", Priority::Medium)).await.expect("put");
        tier.get("k").await.expect("get");
        let hit = tier.get("k").await.expect("get").expect("hit");
        assert_eq!(hit.access_count(), 2);
    }

    #[tokio::test]
    async fn expired_entry_is_absent_and_purged_on_touch() {
        let tier = tier(16);
        tier.put("k", CacheEntry::new("v".to_string(), Duration::from_millis(1)))
            .await
            .expect("put");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tier.get("k").await.expect("get").is_none());
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.bytes_used(), 0);
    }

    #[tokio::test]
    async fn delete_adjusts_accounting() {
        let tier = tier(16);
        tier.put("k", entry("v", Priority::Medium)).await.expect("put");
        assert!(tier.delete("k").await.expect("delete"));
        assert!(!tier.delete("k").await.expect("delete"));
        assert_eq!(tier.bytes_used(), 0);
    }

    #[tokio::test]
    async fn overwrite_does_not_double_count() {
        let tier = tier(16);
        tier.put("k", entry("first", Priority::Medium)).await.expect("put");
        let after_first = tier.bytes_used();
        tier.put("k", entry("first", Priority::Medium)).await.expect("put");
        assert_eq!(tier.bytes_used(), after_first);
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn eviction_prefers_low_priority_then_lru() {
        let tier = tier(4);
        tier.put("critical", entry("a", Priority::Critical)).await.expect("put");
        tier.put("low-old", entry("b", Priority::Low)).await.expect("put");
        tier.put("low-new", entry("c", Priority::Low)).await.expect("put");
        tier.put("medium", entry("d", Priority::Medium)).await.expect("put");

        // Touch the newer low entry so recency separates the two.
        tier.get("low-new").await.expect("get");

        let evicted = tier.put("extra", entry("e", Priority::Medium)).await.expect("put");
        assert_eq!(evicted, 1);

        assert!(tier.get("low-old").await.expect("get").is_none());
        assert!(tier.get("critical").await.expect("get").is_some());
        assert!(tier.get("medium").await.expect("get").is_some());
        assert!(tier.get("low-new").await.expect("get").is_some());
        assert!(tier.get("extra").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn oversized_value_is_rejected_outright() {
        let tiny = VolatileTier::new(&TierDescriptor::volatile(16, 64));
        let err = tiny
            .put("k", entry(&"x".repeat(4096), Priority::Medium))
            .await
            .expect_err("must reject");
        assert!(matches!(err, CacheError::CapacityExceeded { tier: TierKind::Volatile }));
    }

    #[tokio::test]
    async fn byte_ceiling_triggers_batch_eviction() {
        let tier = VolatileTier::new(&TierDescriptor::volatile(1000, 4096));
        for i in 0..20 {
            tier.put(&format!("k{i}"), entry(&"x".repeat(100), Priority::Medium))
                .await
                .expect("put");
        }
        assert!(tier.bytes_used() <= 4096 + 300);
        assert!(tier.len() < 20);
    }

    #[tokio::test]
    async fn scan_keys_filters_by_pattern() {
        let tier = tier(16);
        for key in ["user:1", "user:2", "order:1"] {
            tier.put(key, entry("v", Priority::Medium)).await.expect("put");
        }
        let mut keys = tier
            .scan_keys(&KeyPattern::prefix("user:"))
            .await
            .expect("scan");
        keys.sort();
        assert_eq!(keys, vec!["user:1", "user:2"]);
    }

    #[tokio::test]
    async fn purge_expired_removes_only_stale_entries() {
        let tier = tier(16);
        tier.put("stale", CacheEntry::new("v".to_string(), Duration::from_millis(1)))
            .await
            .expect("put");
        tier.put("fresh", entry("v", Priority::Medium)).await.expect("put");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let purged = tier.purge_expired(SystemTime::now()).await.expect("purge");
        assert_eq!(purged, 1);
        assert_eq!(tier.len(), 1);
        assert!(tier.get("fresh").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn clear_resets_accounting() {
        let tier = tier(16);
        for i in 0..5 {
            tier.put(&format!("k{i}"), entry("v", Priority::Medium)).await.expect("put");
        }
        tier.clear().await.expect("clear");
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.bytes_used(), 0);
    }

    #[tokio::test]
    async fn ttl_override_caps_entry_lifetime() {
        let desc = TierDescriptor::volatile(16, 1024 * 1024).with_ttl(Duration::from_millis(5));
        let tier: VolatileTier<String> = VolatileTier::new(&desc);
        tier.put("k", entry("v", Priority::Medium)).await.expect("put");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tier.get("k").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn concurrent_writers_stay_consistent() {
        use std::sync::Arc;
        use tokio::task::JoinSet;

        let tier = Arc::new(tier(128));
        let mut join_set = JoinSet::new();
        for i in 0..64 {
            let tier = Arc::clone(&tier);
            join_set.spawn(async move {
                tier.put(&format!("k{i}"), entry("v", Priority::Medium)).await
            });
        }
        while let Some(result) = join_set.join_next().await {
            result.expect("join").expect("put");
        }
        assert_eq!(tier.len(), 64);

        let mut expected = 0;
        for i in 0..64 {
            if tier.get(&format!("k{i}")).await.expect("get").is_some() {
                expected += 1;
            }
        }
        assert_eq!(expected, 64);
    }
}
