// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! The named cache façade.
//!
//! [`NamedCache`] composes the tier hierarchy, codec, singleflight
//! loading, invalidation routing, warming, sync and metrics behind the
//! operations a caller sees: `get`, `set`, `get_or_set`, `delete`,
//! `invalidate_by_pattern`, `clear`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;

use strata_tier::{CacheEntry, CacheError, KeyPattern, Priority, Result, TierStore};

use crate::builder::NamedCacheBuilder;
use crate::flight::FlightGroup;
use crate::invalidate::{CacheHandle, CacheRegistry};
use crate::metrics::{CacheMetrics, MetricsSnapshot, key_prefix};
use crate::profile::{CacheProfile, CascadeAction};
use crate::refresh::RefreshAhead;
use crate::sync::{EventKind, InvalidationEvent, SyncHub};
use crate::warming::{self, WarmingRule};

/// Everything a cache instance owns. Lives behind one `Arc`, shared with
/// the background tasks through weak references so dropping the last
/// cache handle shuts the tasks down.
pub(crate) struct CacheCore<V> {
    pub(crate) profile: CacheProfile,
    pub(crate) tiers: Vec<Arc<dyn TierStore<V>>>,
    pub(crate) flight: FlightGroup<Result<V>>,
    pub(crate) metrics: Arc<CacheMetrics>,
    pub(crate) hub: Option<SyncHub>,
    pub(crate) origin_id: String,
    pub(crate) registry: Option<CacheRegistry>,
    pub(crate) refresh: Option<RefreshAhead>,
    pub(crate) warming_rules: Vec<WarmingRule<V>>,
    pub(crate) shutdown: CancellationToken,
}

impl<V> Drop for CacheCore<V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<V> CacheCore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Probes tiers fastest-first, promoting a hit into every faster
    /// configured tier.
    pub(crate) async fn probe(&self, key: &str) -> Option<CacheEntry<V>> {
        for (idx, tier) in self.tiers.iter().enumerate() {
            let started = Instant::now();
            match tier.get(key).await {
                Ok(Some(entry)) => {
                    self.metrics.record_hit(tier.kind(), started.elapsed());
                    tracing::debug!(
                        target: "strata",
                        cache = %self.profile.name,
                        key_prefix = %key_prefix(key),
                        tier = %tier.kind(),
                        "cache.hit"
                    );
                    if idx > 0 {
                        self.promote(key, &entry, idx).await;
                    }
                    return Some(entry);
                }
                Ok(None) => {}
                Err(e) => {
                    // A failing tier is recovered locally: the next tier
                    // gets probed.
                    self.metrics.record_error();
                    tracing::warn!(
                        target: "strata",
                        cache = %self.profile.name,
                        key_prefix = %key_prefix(key),
                        tier = %tier.kind(),
                        error = %e,
                        "cache.error"
                    );
                }
            }
        }
        self.metrics.record_miss();
        tracing::debug!(
            target: "strata",
            cache = %self.profile.name,
            key_prefix = %key_prefix(key),
            "cache.miss"
        );
        None
    }

    /// Copies a lower-tier hit into every faster tier. Best-effort: a
    /// promotion losing a race to eviction or delete never affects the
    /// read that triggered it.
    async fn promote(&self, key: &str, entry: &CacheEntry<V>, found_at: usize) {
        for tier in &self.tiers[..found_at] {
            match tier.put(key, entry.clone()).await {
                Ok(evicted) => {
                    if evicted > 0 {
                        self.metrics.record_evictions(evicted);
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        target: "strata",
                        cache = %self.profile.name,
                        key_prefix = %key_prefix(key),
                        tier = %tier.kind(),
                        error = %e,
                        "promotion skipped"
                    );
                }
            }
        }
    }

    /// Residency check without metrics or promotion side effects; used
    /// by the warming scheduler's idempotence guard.
    pub(crate) async fn is_resident(&self, key: &str) -> bool {
        for tier in &self.tiers {
            if let Ok(Some(_)) = tier.get(key).await {
                return true;
            }
        }
        false
    }

    /// Writes an entry through every configured tier. A tier at capacity
    /// falls back to the next one; if no tier accepts, the write is
    /// dropped silently. Other tier faults surface only when every tier
    /// failed with one.
    pub(crate) async fn write_through(
        &self,
        key: &str,
        value: V,
        ttl: Option<Duration>,
        priority: Priority,
    ) -> Result<()> {
        let entry = CacheEntry::with_priority(value, ttl.unwrap_or(self.profile.default_ttl), priority);

        let mut stored = 0u32;
        let mut last_err = None;
        for tier in &self.tiers {
            match tier.put(key, entry.clone()).await {
                Ok(evicted) => {
                    stored += 1;
                    if evicted > 0 {
                        self.metrics.record_evictions(evicted);
                    }
                }
                Err(CacheError::CapacityExceeded { tier: kind }) => {
                    tracing::debug!(
                        target: "strata",
                        cache = %self.profile.name,
                        key_prefix = %key_prefix(key),
                        tier = %kind,
                        "tier at capacity, falling back"
                    );
                }
                Err(e) => {
                    self.metrics.record_error();
                    tracing::warn!(
                        target: "strata",
                        cache = %self.profile.name,
                        key_prefix = %key_prefix(key),
                        tier = %tier.kind(),
                        error = %e,
                        "cache.error"
                    );
                    last_err = Some(e);
                }
            }
        }

        if stored > 0 {
            self.publish(EventKind::Set, Some(key.to_string()), None);
            Ok(())
        } else if let Some(err) = last_err {
            Err(err)
        } else {
            tracing::debug!(
                target: "strata",
                cache = %self.profile.name,
                key_prefix = %key_prefix(key),
                "no tier accepted the write"
            );
            Ok(())
        }
    }

    /// Deletes a key from every tier without emitting a sync event.
    pub(crate) async fn delete_local(&self, key: &str) -> bool {
        let mut removed = false;
        for tier in &self.tiers {
            match tier.delete(key).await {
                Ok(true) => removed = true,
                Ok(false) => {}
                Err(e) => {
                    self.metrics.record_error();
                    tracing::warn!(
                        target: "strata",
                        cache = %self.profile.name,
                        tier = %tier.kind(),
                        error = %e,
                        "cache.error"
                    );
                }
            }
        }
        removed
    }

    /// Pattern-deletes across every tier; returns the distinct keys
    /// removed.
    pub(crate) async fn invalidate_local(&self, pattern: &KeyPattern) -> Vec<String> {
        let mut removed: Vec<String> = Vec::new();
        for tier in &self.tiers {
            let keys = match tier.scan_keys(pattern).await {
                Ok(keys) => keys,
                Err(e) => {
                    self.metrics.record_error();
                    tracing::warn!(
                        target: "strata",
                        cache = %self.profile.name,
                        tier = %tier.kind(),
                        error = %e,
                        "cache.error"
                    );
                    continue;
                }
            };
            for key in keys {
                match tier.delete(&key).await {
                    Ok(true) => {
                        if !removed.contains(&key) {
                            removed.push(key);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.metrics.record_error();
                        tracing::warn!(
                            target: "strata",
                            cache = %self.profile.name,
                            tier = %tier.kind(),
                            error = %e,
                            "cache.error"
                        );
                    }
                }
            }
        }
        if !removed.is_empty() {
            self.metrics.record_invalidations(removed.len() as u64);
        }
        removed
    }

    pub(crate) async fn clear_local(&self) {
        for tier in &self.tiers {
            if let Err(e) = tier.clear().await {
                self.metrics.record_error();
                tracing::warn!(
                    target: "strata",
                    cache = %self.profile.name,
                    tier = %tier.kind(),
                    error = %e,
                    "cache.error"
                );
            }
        }
    }

    /// Evaluates cascade rules against the keys an invalidation removed.
    /// Cascade application never re-enters the target's own cascades, so
    /// chains cannot recurse.
    pub(crate) async fn run_cascades(&self, removed: &[String]) {
        if removed.is_empty() || self.profile.cascades.is_empty() {
            return;
        }
        let Some(registry) = &self.registry else {
            return;
        };
        for rule in &self.profile.cascades {
            if !removed.iter().any(|key| rule.when.matches(key)) {
                continue;
            }
            let Some(target) = registry.lookup(&rule.target) else {
                tracing::warn!(
                    target: "strata",
                    cache = %self.profile.name,
                    cascade_target = %rule.target,
                    "cascade target not registered"
                );
                continue;
            };
            match &rule.action {
                CascadeAction::ClearAll => target.cascade_clear().await,
                CascadeAction::Invalidate(pattern) => {
                    target.cascade_invalidate(pattern).await;
                }
            }
        }
    }

    pub(crate) fn publish(&self, kind: EventKind, key: Option<String>, pattern: Option<String>) {
        let Some(hub) = &self.hub else {
            return;
        };
        hub.publish(InvalidationEvent::new(
            &self.profile.name,
            kind,
            key,
            pattern,
            &self.origin_id,
        ));
        self.metrics.record_sync_published();
    }

    /// Applies a sibling's event. Events from this instance or for other
    /// caches are ignored.
    pub(crate) async fn apply_remote(&self, event: &InvalidationEvent) {
        if event.origin_id == self.origin_id || event.cache != self.profile.name {
            return;
        }
        match event.kind {
            // A sibling wrote the key; the local copy is stale. The next
            // read misses and reloads.
            EventKind::Set | EventKind::Delete => {
                if let Some(key) = &event.key {
                    self.delete_local(key).await;
                }
            }
            EventKind::Clear => self.clear_local().await,
            EventKind::Invalidate => {
                if let Some(raw) = &event.pattern
                    && let Ok(pattern) = KeyPattern::parse(raw)
                {
                    self.invalidate_local(&pattern).await;
                }
            }
        }
        self.metrics.record_sync_applied();
        tracing::debug!(
            target: "strata",
            cache = %self.profile.name,
            kind = ?event.kind,
            "cache.sync"
        );
    }
}

#[async_trait]
impl<V> CacheHandle for CacheCore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.profile.name
    }

    async fn cascade_invalidate(&self, pattern: &KeyPattern) -> u64 {
        let removed = self.invalidate_local(pattern).await;
        if !removed.is_empty() {
            self.publish(EventKind::Invalidate, None, Some(pattern.to_string()));
        }
        removed.len() as u64
    }

    async fn cascade_clear(&self) {
        self.clear_local().await;
        self.publish(EventKind::Clear, None, None);
    }
}

/// One independently-configured cache: its own capacity, TTL, tier set,
/// codec policy and sync scope, constructed from a [`CacheProfile`] and
/// passed around explicitly.
///
/// Cloning is cheap and shares the instance. Background tasks stop when
/// the last clone drops or [`NamedCache::shutdown`] is called.
///
/// # Examples
///
/// ```
/// use strata::{CacheProfile, NamedCache};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let cache: NamedCache<String> = NamedCache::builder(CacheProfile::new("provider-records"))
///     .build()
///     .await?;
///
/// cache.set("provider:7", "Dr. Reyes".to_string()).await?;
/// assert_eq!(cache.get("provider:7").await, Some("Dr. Reyes".to_string()));
/// # Ok::<(), strata::CacheError>(())
/// # });
/// ```
pub struct NamedCache<V> {
    pub(crate) core: Arc<CacheCore<V>>,
}

impl<V> Clone for NamedCache<V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V> NamedCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Starts building a cache from a profile.
    #[must_use]
    pub fn builder(profile: CacheProfile) -> NamedCacheBuilder<V> {
        NamedCacheBuilder::new(profile)
    }

    /// The cache's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.profile.name
    }

    /// The profile the cache was built from.
    #[must_use]
    pub fn profile(&self) -> &CacheProfile {
        &self.core.profile
    }

    /// Retrieves a value, probing tiers fastest-first and promoting the
    /// hit. Returns `None` on a full miss or an expired entry.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.core.probe(key).await.map(CacheEntry::into_value)
    }

    /// Like [`get`](Self::get) but keeps the entry metadata.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.core.probe(key).await
    }

    /// Writes a value with the profile's default TTL at
    /// [`Priority::Medium`].
    ///
    /// # Errors
    ///
    /// Only when every configured tier failed with a non-capacity fault;
    /// capacity rejections fall back to slower tiers or drop the write.
    pub async fn set(&self, key: &str, value: V) -> Result<()> {
        self.set_with(key, value, None, Priority::Medium).await
    }

    /// Writes a value with an explicit TTL and priority.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub async fn set_with(
        &self,
        key: &str,
        value: V,
        ttl: Option<Duration>,
        priority: Priority,
    ) -> Result<()> {
        self.core.write_through(key, value, ttl, priority).await
    }

    /// Retrieves a value, or loads and caches it on a miss.
    ///
    /// Concurrent callers for the same missing key are coalesced: the
    /// loader runs at most once per outstanding miss and every caller
    /// receives the same result. A loader failure reaches all waiters as
    /// [`CacheError::LoaderFailed`], nothing is cached, and the in-flight
    /// marker clears so a retry can proceed.
    ///
    /// # Errors
    ///
    /// [`CacheError::LoaderFailed`] when the loader fails.
    pub async fn get_or_set<F, Fut, E>(&self, key: &str, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: fmt::Display + Send,
    {
        self.get_or_set_with(key, loader, None, Priority::Medium).await
    }

    /// [`get_or_set`](Self::get_or_set) with an explicit TTL and
    /// priority for the loaded entry.
    ///
    /// When the profile configures a refresh threshold and the hit is
    /// older than it, the loader re-runs in the background and the fresh
    /// value is written through the normal set path; the stale-but-valid
    /// hit is returned immediately.
    ///
    /// # Errors
    ///
    /// [`CacheError::LoaderFailed`] when the loader fails.
    pub async fn get_or_set_with<F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        ttl: Option<Duration>,
        priority: Priority,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: fmt::Display + Send,
    {
        if let Some(entry) = self.core.probe(key).await {
            let age = entry.age();
            let value = entry.into_value();
            self.maybe_refresh(key, age, loader, ttl, priority);
            return Ok(value);
        }

        let owner = Arc::clone(&self.core);
        let owned_key = key.to_string();
        self.core
            .flight
            .work(key, move || async move {
                // Double check: a concurrent caller may have populated
                // the key while this one waited for the flight slot.
                if let Some(entry) = owner.probe(&owned_key).await {
                    return Ok(entry.into_value());
                }

                let started = Instant::now();
                match loader().await {
                    Ok(value) => {
                        owner.metrics.record_load(started.elapsed());
                        if let Err(e) = owner
                            .write_through(&owned_key, value.clone(), ttl, priority)
                            .await
                        {
                            tracing::warn!(
                                target: "strata",
                                cache = %owner.profile.name,
                                key_prefix = %key_prefix(&owned_key),
                                error = %e,
                                "cache.error"
                            );
                        }
                        Ok(value)
                    }
                    Err(e) => {
                        owner.metrics.record_loader_failure();
                        tracing::warn!(
                            target: "strata",
                            cache = %owner.profile.name,
                            key_prefix = %key_prefix(&owned_key),
                            error = %e,
                            "cache.error"
                        );
                        Err(CacheError::loader(e))
                    }
                }
            })
            .await
    }

    /// Spawns a background reload when the entry is due and no refresh
    /// for the key is already in flight.
    fn maybe_refresh<F, Fut, E>(
        &self,
        key: &str,
        age: Duration,
        loader: F,
        ttl: Option<Duration>,
        priority: Priority,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: fmt::Display + Send,
    {
        let Some(refresh) = &self.core.refresh else {
            return;
        };
        if !refresh.should_refresh(age) || !refresh.try_start(key) {
            return;
        }

        let core = Arc::clone(&self.core);
        let key = key.to_string();
        drop(tokio::spawn(async move {
            match loader().await {
                Ok(value) => {
                    if let Err(e) = core.write_through(&key, value, ttl, priority).await {
                        tracing::warn!(
                            target: "strata",
                            cache = %core.profile.name,
                            key_prefix = %key_prefix(&key),
                            error = %e,
                            "cache.error"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target: "strata",
                        cache = %core.profile.name,
                        key_prefix = %key_prefix(&key),
                        error = %e,
                        "refresh load failed, keeping stale entry"
                    );
                }
            }
            if let Some(refresh) = &core.refresh {
                refresh.finish(&key);
            }
        }));
    }

    /// Removes a key from every tier. Returns `true` if it was resident
    /// anywhere. Emits a sync event and evaluates cascades on removal.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.core.delete_local(key).await;
        if removed {
            self.core.metrics.record_invalidations(1);
            self.core.publish(EventKind::Delete, Some(key.to_string()), None);
            let keys = [key.to_string()];
            self.core.run_cascades(&keys).await;
        }
        removed
    }

    /// Deletes every key matching the pattern grammar (`"user:*"`,
    /// `"re:^user:\d+$"`, or an exact key) across every populated tier.
    /// Returns the number of distinct keys removed. Cascades declared in
    /// the profile run synchronously within this call.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidConfig`] for an unparsable pattern.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<u64> {
        let pattern = KeyPattern::parse(pattern)?;
        let removed = self.core.invalidate_local(&pattern).await;
        if !removed.is_empty() {
            self.core
                .publish(EventKind::Invalidate, None, Some(pattern.to_string()));
        }
        self.core.run_cascades(&removed).await;
        Ok(removed.len() as u64)
    }

    /// Removes everything from every tier.
    pub async fn clear(&self) {
        self.core.clear_local().await;
        self.core.publish(EventKind::Clear, None, None);
    }

    /// Returns `true` if the key is resident in any tier.
    pub async fn contains(&self, key: &str) -> bool {
        self.core.is_resident(key).await
    }

    /// Total entries across all tiers (an entry in two tiers counts
    /// twice).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.core.tiers.iter().map(|t| t.len()).sum()
    }

    /// Returns `true` if every tier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.tiers.iter().all(|t| t.is_empty())
    }

    /// A point-in-time copy of the cache's counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Runs the registered warming rules now, skipping keys that are
    /// already resident. Returns the number of entries loaded. Safe to
    /// call repeatedly; warming is idempotent.
    pub async fn run_warming(&self) -> u64 {
        warming::run_rules(&self.core).await
    }

    /// Purges expired entries from every tier immediately, independent
    /// of the background sweep. Returns the count removed.
    pub async fn purge_expired(&self) -> u64 {
        let now = SystemTime::now();
        let mut purged = 0;
        for tier in &self.core.tiers {
            match tier.purge_expired(now).await {
                Ok(count) => purged += count,
                Err(e) => {
                    self.core.metrics.record_error();
                    tracing::warn!(
                        target: "strata",
                        cache = %self.name(),
                        tier = %tier.kind(),
                        error = %e,
                        "cache.error"
                    );
                }
            }
        }
        if purged > 0 {
            self.core.metrics.record_expirations(purged);
        }
        purged
    }

    /// Stops the background tasks (sweep, warming, sync listener) and
    /// releases the broadcast subscription. The cache itself remains
    /// usable for direct calls.
    pub fn shutdown(&self) {
        self.core.shutdown.cancel();
    }
}

impl<V> fmt::Debug for NamedCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedCache")
            .field("name", &self.core.profile.name)
            .field("tiers", &self.core.tiers.len())
            .finish_non_exhaustive()
    }
}
