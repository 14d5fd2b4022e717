// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Per-cache performance counters.
//!
//! Lock-free atomics updated on every operation, exposed as a
//! [`MetricsSnapshot`]. Latencies use a crude exponential smoothing with
//! a fixed factor of one half (`new = (old + sample) / 2`): a deliberate,
//! documented simplification; a deployment that needs percentiles should
//! export the snapshot into a histogram-based pipeline instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use strata_tier::TierKind;

/// Longest key prefix that may appear in logs. Full keys can embed user
/// identifiers, so events never carry more than this.
const KEY_PREFIX_LEN: usize = 16;

/// Truncates a key for structured log events.
pub(crate) fn key_prefix(key: &str) -> &str {
    match key.char_indices().nth(KEY_PREFIX_LEN) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

/// Lock-free counters for one named cache.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    volatile_hits: AtomicU64,
    durable_small_hits: AtomicU64,
    durable_bulk_hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    loader_failures: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
    sync_published: AtomicU64,
    sync_applied: AtomicU64,
    sync_dropped: AtomicU64,
    hit_latency_us: AtomicU64,
    load_latency_us: AtomicU64,
}

impl CacheMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self, tier: TierKind, latency: Duration) {
        let counter = match tier {
            TierKind::Volatile => &self.volatile_hits,
            TierKind::DurableSmall => &self.durable_small_hits,
            TierKind::DurableBulk => &self.durable_bulk_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        update_ema(&self.hit_latency_us, latency);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self, latency: Duration) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        update_ema(&self.load_latency_us, latency);
    }

    pub(crate) fn record_loader_failure(&self) {
        self.loader_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync_published(&self) {
        self.sync_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync_applied(&self) {
        self.sync_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync_dropped(&self) {
        self.sync_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter at a single point in time.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            volatile_hits: self.volatile_hits.load(Ordering::Relaxed),
            durable_small_hits: self.durable_small_hits.load(Ordering::Relaxed),
            durable_bulk_hits: self.durable_bulk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            loader_failures: self.loader_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            sync_published: self.sync_published.load(Ordering::Relaxed),
            sync_applied: self.sync_applied.load(Ordering::Relaxed),
            sync_dropped: self.sync_dropped.load(Ordering::Relaxed),
            hit_latency_us: self.hit_latency_us.load(Ordering::Relaxed),
            load_latency_us: self.load_latency_us.load(Ordering::Relaxed),
        }
    }
}

/// `new = (old + sample) / 2`, seeded with the first sample. Updates race
/// under contention; an occasionally lost sample is acceptable for a
/// rolling estimator.
fn update_ema(slot: &AtomicU64, sample: Duration) {
    let sample_us = u64::try_from(sample.as_micros()).unwrap_or(u64::MAX);
    let old = slot.load(Ordering::Relaxed);
    let smoothed = if old == 0 { sample_us } else { old.midpoint(sample_us) };
    slot.store(smoothed, Ordering::Relaxed);
}

/// A point-in-time copy of a cache's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Hits served from the volatile tier.
    pub volatile_hits: u64,
    /// Hits served from the durable-small tier.
    pub durable_small_hits: u64,
    /// Hits served from the durable-bulk tier.
    pub durable_bulk_hits: u64,
    /// Probes that missed every tier.
    pub misses: u64,
    /// Loader executions.
    pub loads: u64,
    /// Loader executions that failed.
    pub loader_failures: u64,
    /// Entries evicted for capacity.
    pub evictions: u64,
    /// Entries purged past their TTL.
    pub expirations: u64,
    /// Entries removed by delete or pattern invalidation.
    pub invalidations: u64,
    /// Recovered tier or codec faults.
    pub errors: u64,
    /// Sync events published.
    pub sync_published: u64,
    /// Sibling events applied locally.
    pub sync_applied: u64,
    /// Sibling events lost to channel lag.
    pub sync_dropped: u64,
    /// Smoothed hit latency, microseconds.
    pub hit_latency_us: u64,
    /// Smoothed loader latency, microseconds.
    pub load_latency_us: u64,
}

impl MetricsSnapshot {
    /// Total hits across all tiers.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.volatile_hits + self.durable_small_hits + self.durable_bulk_hits
    }

    /// Hits over probes, zero when nothing was probed.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss, reason = "counter magnitudes fit f64 comfortably")]
            {
                hits as f64 / total as f64
            }
        }
    }
}
