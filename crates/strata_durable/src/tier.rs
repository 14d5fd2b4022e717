// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Durable tier implementation over backend + codec.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};

use strata_codec::EntryCodec;
use strata_tier::{
    CacheEntry, CacheError, EntryEnvelope, KeyPattern, Priority, Result, TierDescriptor, TierKind,
    TierStore,
    entry::ms_to_system_time,
    policy::{VictimCandidate, select_victims},
};

use crate::backend::DurableBackend;

/// Per-key metadata mirrored in memory so eviction ranking and pattern
/// scans never touch the backend or decrypt payloads.
#[derive(Clone, Debug)]
struct IndexEntry {
    bytes: u64,
    priority: Priority,
    expires_at: SystemTime,
    last_accessed_at: SystemTime,
}

/// A durable tier: codec-produced envelopes in a pluggable backend.
///
/// Two flavors share this implementation. Durable-small carries a
/// `max_value_bytes` bound and rejects oversized payloads outright;
/// durable-bulk accepts larger payloads under a bigger byte budget. Both
/// keep an in-memory index of envelope metadata, which is what pattern
/// scans and victim selection rank against.
///
/// Access recency is tracked in the index only; envelopes are not
/// rewritten on read. The persisted `access_count` therefore reflects the
/// count at last write, which is sufficient for eviction ranking after a
/// restart.
pub struct DurableTier<V> {
    kind: TierKind,
    backend: Arc<dyn DurableBackend>,
    codec: Arc<EntryCodec>,
    index: DashMap<String, IndexEntry>,
    bytes_used: AtomicU64,
    max_entries: u64,
    max_bytes: u64,
    max_value_bytes: Option<u64>,
    ttl_override: Option<Duration>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> DurableTier<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Builds a durable tier from its descriptor.
    #[must_use]
    pub fn new(desc: &TierDescriptor, backend: Arc<dyn DurableBackend>, codec: Arc<EntryCodec>) -> Self {
        debug_assert!(desc.kind.is_durable());
        Self {
            kind: desc.kind,
            backend,
            codec,
            index: DashMap::new(),
            bytes_used: AtomicU64::new(0),
            max_entries: desc.max_entries.max(1),
            max_bytes: desc.max_bytes.max(1),
            max_value_bytes: desc.max_value_bytes,
            ttl_override: desc.ttl_override,
            _marker: PhantomData,
        }
    }

    /// Rebuilds the in-memory index from records already in the backend,
    /// dropping any that are expired or undecodable.
    ///
    /// Called once at cache construction for backends that outlive the
    /// process.
    ///
    /// # Errors
    ///
    /// Backend I/O failures; individual bad records are skipped, not
    /// fatal.
    pub async fn hydrate(&self) -> Result<u64> {
        let now = SystemTime::now();
        let mut restored = 0;
        for key in self.backend.keys().await? {
            let Some(bytes) = self.backend.read(&key).await? else {
                continue;
            };
            let Ok(envelope) = bincode::deserialize::<EntryEnvelope>(&bytes) else {
                let _ = self.backend.remove(&key).await;
                continue;
            };
            if envelope.is_expired_at(now) {
                let _ = self.backend.remove(&key).await;
                continue;
            }
            let record_bytes = bytes.len() as u64;
            self.index.insert(
                key,
                IndexEntry {
                    bytes: record_bytes,
                    priority: Priority::from_u8(envelope.priority).unwrap_or_default(),
                    expires_at: ms_to_system_time(envelope.expires_at_ms),
                    last_accessed_at: now,
                },
            );
            self.bytes_used.fetch_add(record_bytes, Ordering::Relaxed);
            restored += 1;
        }
        Ok(restored)
    }

    /// Drops a key from index and backend, e.g. after a decode failure.
    async fn purge(&self, key: &str) {
        if let Some((_, meta)) = self.index.remove(key) {
            self.bytes_used.fetch_sub(meta.bytes, Ordering::Relaxed);
        }
        if let Err(e) = self.backend.remove(key).await {
            tracing::warn!(target: "strata", error = %e, "purge of durable record failed");
        }
    }

    async fn make_room(&self, incoming_key: &str, incoming_bytes: u64) -> u64 {
        let replaced_bytes = self.index.get(incoming_key).map_or(0, |meta| meta.bytes);

        let projected_entries = self.index.len() as u64 + u64::from(replaced_bytes == 0);
        let projected_bytes = self.bytes_used.load(Ordering::Relaxed) + incoming_bytes - replaced_bytes;

        let over_count = projected_entries > self.max_entries;
        let over_bytes = projected_bytes > self.max_bytes;
        if !over_count && !over_bytes {
            return 0;
        }

        let snapshot_at = SystemTime::now();
        let candidates: Vec<VictimCandidate> = self
            .index
            .iter()
            .filter(|meta| meta.key() != incoming_key)
            .map(|meta| VictimCandidate {
                key: meta.key().clone(),
                priority: meta.priority,
                last_accessed_at: meta.last_accessed_at,
                bytes: meta.bytes,
            })
            .collect();

        let mut evicted = 0;
        for victim in select_victims(candidates, over_count, over_bytes) {
            let removed = self
                .index
                .remove_if(&victim.key, |_, meta| meta.last_accessed_at <= snapshot_at);
            if let Some((key, meta)) = removed {
                self.bytes_used.fetch_sub(meta.bytes, Ordering::Relaxed);
                if let Err(e) = self.backend.remove(&key).await {
                    tracing::warn!(target: "strata", error = %e, "evicted record removal failed");
                }
                evicted += 1;
                tracing::debug!(target: "strata", key = %key, tier = %self.kind, "cache.evict");
            }
        }
        evicted
    }
}

#[async_trait]
impl<V> TierStore<V> for DurableTier<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        let expired = match self.index.get_mut(key) {
            None => return Ok(None),
            Some(mut meta) => {
                if meta.expires_at < SystemTime::now() {
                    true
                } else {
                    meta.last_accessed_at = SystemTime::now();
                    false
                }
            }
        };
        if expired {
            self.purge(key).await;
            return Ok(None);
        }

        let Some(bytes) = self.backend.read(key).await? else {
            // Index said present, backend disagrees; trust the backend.
            self.purge(key).await;
            return Ok(None);
        };

        let envelope: EntryEnvelope = match bincode::deserialize(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(target: "strata", tier = %self.kind, error = %e, "cache.error");
                self.purge(key).await;
                return Ok(None);
            }
        };

        match self.codec.decode::<V>(&envelope) {
            Ok(mut entry) => {
                if entry.is_expired() {
                    self.purge(key).await;
                    return Ok(None);
                }
                entry.touch();
                Ok(Some(entry))
            }
            Err(CacheError::CorruptEntry { reason }) => {
                tracing::warn!(target: "strata", tier = %self.kind, reason = %reason, "cache.error");
                self.purge(key).await;
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    async fn put(&self, key: &str, mut entry: CacheEntry<V>) -> Result<u64> {
        if let Some(ttl) = self.ttl_override {
            entry.clamp_expiry(entry.created_at() + ttl);
        }

        let envelope = self.codec.encode(&entry)?;
        let bytes = bincode::serialize(&envelope)
            .map_err(|e| CacheError::Codec(format!("encode envelope: {e}")))?;
        let record_bytes = bytes.len() as u64;

        if let Some(bound) = self.max_value_bytes
            && record_bytes > bound
        {
            return Err(CacheError::CapacityExceeded { tier: self.kind });
        }
        if record_bytes > self.max_bytes {
            return Err(CacheError::CapacityExceeded { tier: self.kind });
        }

        let evicted = self.make_room(key, record_bytes).await;

        self.backend.write(key, &bytes).await?;
        let meta = IndexEntry {
            bytes: record_bytes,
            priority: entry.priority(),
            expires_at: entry.expires_at(),
            last_accessed_at: entry.last_accessed_at(),
        };
        if let Some(old) = self.index.insert(key.to_string(), meta) {
            self.bytes_used.fetch_sub(old.bytes, Ordering::Relaxed);
        }
        self.bytes_used.fetch_add(record_bytes, Ordering::Relaxed);
        Ok(evicted)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = match self.index.remove(key) {
            Some((_, meta)) => {
                self.bytes_used.fetch_sub(meta.bytes, Ordering::Relaxed);
                true
            }
            None => false,
        };
        let backend_had = self.backend.remove(key).await?;
        Ok(existed || backend_had)
    }

    async fn scan_keys(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        Ok(self
            .index
            .iter()
            .filter(|meta| pattern.matches(meta.key()))
            .map(|meta| meta.key().clone())
            .collect())
    }

    async fn purge_expired(&self, now: SystemTime) -> Result<u64> {
        let stale: Vec<String> = self
            .index
            .iter()
            .filter(|meta| meta.expires_at < now)
            .map(|meta| meta.key().clone())
            .collect();

        let mut purged = 0;
        for key in stale {
            let removed = self.index.remove_if(&key, |_, meta| meta.expires_at < now);
            if let Some((_, meta)) = removed {
                self.bytes_used.fetch_sub(meta.bytes, Ordering::Relaxed);
                let _ = self.backend.remove(&key).await;
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn clear(&self) -> Result<()> {
        self.index.clear();
        self.bytes_used.store(0, Ordering::Relaxed);
        self.backend.clear().await
    }

    fn len(&self) -> u64 {
        self.index.len() as u64
    }

    fn bytes_used(&self) -> u64 {
        self.bytes_used.load(Ordering::Relaxed)
    }
}

impl<V> fmt::Debug for DurableTier<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableTier")
            .field("kind", &self.kind)
            .field("entries", &self.index.len())
            .field("bytes_used", &self.bytes_used.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileBackend, MemoryBackend};

    fn small_tier(max_bytes: u64, max_value_bytes: u64) -> DurableTier<String> {
        DurableTier::new(
            &TierDescriptor::durable_small(max_bytes, max_value_bytes),
            Arc::new(MemoryBackend::new()),
            Arc::new(EntryCodec::plaintext(None)),
        )
    }

    fn bulk_tier(max_entries: u64) -> DurableTier<String> {
        DurableTier::new(
            &TierDescriptor::durable_bulk(max_entries, 64 * 1024 * 1024),
            Arc::new(MemoryBackend::new()),
            Arc::new(EntryCodec::plaintext(None)),
        )
    }

    fn entry(value: &str) -> CacheEntry<String> {
        CacheEntry::new(value.to_string(), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn put_then_get_round_trips_through_the_codec() {
        let tier = bulk_tier(64);
        tier.put("k", entry("payload")).await.expect("put");
        let hit = tier.get("k").await.expect("get").expect("hit");
        assert_eq!(hit.value(), "payload");
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_absent() {
        let tier = bulk_tier(64);
        assert!(tier.get("nope").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn small_tier_rejects_oversized_payloads() {
        let tier = small_tier(4 * 1024 * 1024, 128);
        let err = tier
            .put("big", entry(&"x".repeat(4096)))
            .await
            .expect_err("must reject");
        assert!(matches!(
            err,
            CacheError::CapacityExceeded {
                tier: TierKind::DurableSmall
            }
        ));
        assert_eq!(tier.len(), 0);
    }

    #[tokio::test]
    async fn small_tier_accepts_payloads_under_the_bound() {
        let tier = small_tier(4 * 1024 * 1024, 4096);
        tier.put("small", entry("fits")).await.expect("put");
        assert!(tier.get("small").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn scan_uses_the_index_not_the_backend() {
        let tier = bulk_tier(64);
        for key in ["user:1", "user:2", "order:1"] {
            tier.put(key, entry("v")).await.expect("put");
        }
        let mut keys = tier
            .scan_keys(&KeyPattern::prefix("user:"))
            .await
            .expect("scan");
        keys.sort();
        assert_eq!(keys, vec!["user:1", "user:2"]);
    }

    #[tokio::test]
    async fn count_ceiling_evicts_lowest_ranked() {
        let tier = bulk_tier(4);
        tier.put(
            "critical",
            CacheEntry::with_priority("a".into(), Duration::from_secs(300), Priority::Critical),
        )
        .await
        .expect("put");
        tier.put(
            "low",
            CacheEntry::with_priority("b".into(), Duration::from_secs(300), Priority::Low),
        )
        .await
        .expect("put");
        tier.put("m1", entry("c")).await.expect("put");
        tier.put("m2", entry("d")).await.expect("put");

        let evicted = tier.put("m3", entry("e")).await.expect("put");
        assert_eq!(evicted, 1);
        assert!(tier.get("low").await.expect("get").is_none());
        assert!(tier.get("critical").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn corrupt_backend_record_reads_as_miss_and_purges() {
        let backend = Arc::new(MemoryBackend::new());
        let tier: DurableTier<String> = DurableTier::new(
            &TierDescriptor::durable_bulk(64, 1024 * 1024),
            Arc::clone(&backend) as Arc<dyn DurableBackend>,
            Arc::new(EntryCodec::plaintext(None)),
        );
        tier.put("k", entry("v")).await.expect("put");

        // Scribble over the stored record.
        backend.write("k", b"not an envelope").await.expect("write");

        assert!(tier.get("k").await.expect("get").is_none());
        assert_eq!(tier.len(), 0);
        assert_eq!(backend.read("k").await.expect("read"), None);
    }

    #[tokio::test]
    async fn purge_expired_drops_only_stale_records() {
        let tier = bulk_tier(64);
        tier.put("stale", CacheEntry::new("v".to_string(), Duration::from_millis(1)))
            .await
            .expect("put");
        tier.put("fresh", entry("v")).await.expect("put");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let purged = tier.purge_expired(SystemTime::now()).await.expect("purge");
        assert_eq!(purged, 1);
        assert!(tier.get("fresh").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn hydrate_restores_the_index_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let codec = Arc::new(EntryCodec::plaintext(None));

        {
            let backend = Arc::new(FileBackend::open(dir.path()).await.expect("open"));
            let tier: DurableTier<String> = DurableTier::new(
                &TierDescriptor::durable_bulk(64, 1024 * 1024),
                backend,
                Arc::clone(&codec),
            );
            tier.put("persisted", entry("across restarts")).await.expect("put");
        }

        let backend = Arc::new(FileBackend::open(dir.path()).await.expect("reopen"));
        let tier: DurableTier<String> = DurableTier::new(
            &TierDescriptor::durable_bulk(64, 1024 * 1024),
            backend,
            codec,
        );
        assert_eq!(tier.len(), 0);

        let restored = tier.hydrate().await.expect("hydrate");
        assert_eq!(restored, 1);
        let hit = tier.get("persisted").await.expect("get").expect("hit");
        assert_eq!(hit.value(), "across restarts");
    }

    #[tokio::test]
    async fn clear_empties_index_and_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let tier: DurableTier<String> = DurableTier::new(
            &TierDescriptor::durable_bulk(64, 1024 * 1024),
            Arc::clone(&backend) as Arc<dyn DurableBackend>,
            Arc::new(EntryCodec::plaintext(None)),
        );
        tier.put("a", entry("1")).await.expect("put");
        tier.put("b", entry("2")).await.expect("put");

        tier.clear().await.expect("clear");
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.bytes_used(), 0);
        assert!(backend.keys().await.expect("keys").is_empty());
    }
}
