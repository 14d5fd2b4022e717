// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! The core trait for cache storage backends.
//!
//! [`TierStore`] defines the interface every tier implements. The trait is
//! object-safe so a cache can hold an ordered, heterogeneous tier list and
//! probe it fastest-first.

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::{CacheEntry, KeyPattern, Result};

/// Identifies a tier's storage medium and capacity semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TierKind {
    /// Process memory; fastest, lost on restart.
    Volatile,
    /// Small durable store, bounded to a few megabytes; rejects
    /// oversized payloads outright.
    DurableSmall,
    /// Bulk durable store; larger payloads, keeps its own key index for
    /// pattern scans.
    DurableBulk,
}

impl TierKind {
    /// Whether data in this tier survives a process restart.
    #[must_use]
    pub fn is_durable(self) -> bool {
        !matches!(self, Self::Volatile)
    }

    /// Stable name used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Volatile => "volatile",
            Self::DurableSmall => "durable-small",
            Self::DurableBulk => "durable-bulk",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one tier of a cache hierarchy.
///
/// Tiers are listed fastest→slowest in a profile; writes target the
/// configured subset, reads probe in order with promotion on hit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierDescriptor {
    /// The storage medium.
    pub kind: TierKind,
    /// Caps entry lifetime below the cache-level TTL when set.
    pub ttl_override: Option<Duration>,
    /// Maximum resident entries before eviction triggers.
    pub max_entries: u64,
    /// Maximum resident bytes before eviction triggers.
    pub max_bytes: u64,
    /// Single-payload bound; a larger write is rejected with
    /// `CapacityExceeded` instead of evicting to make room.
    pub max_value_bytes: Option<u64>,
}

impl TierDescriptor {
    /// A volatile tier with the given ceilings.
    #[must_use]
    pub fn volatile(max_entries: u64, max_bytes: u64) -> Self {
        Self {
            kind: TierKind::Volatile,
            ttl_override: None,
            max_entries,
            max_bytes,
            max_value_bytes: None,
        }
    }

    /// A durable-small tier: a few megabytes total, oversized payloads
    /// rejected.
    #[must_use]
    pub fn durable_small(max_bytes: u64, max_value_bytes: u64) -> Self {
        Self {
            kind: TierKind::DurableSmall,
            ttl_override: None,
            max_entries: u64::MAX,
            max_bytes,
            max_value_bytes: Some(max_value_bytes),
        }
    }

    /// A durable-bulk tier with the given byte budget.
    #[must_use]
    pub fn durable_bulk(max_entries: u64, max_bytes: u64) -> Self {
        Self {
            kind: TierKind::DurableBulk,
            ttl_override: None,
            max_entries,
            max_bytes,
            max_value_bytes: None,
        }
    }

    /// Caps entry lifetime in this tier below the cache-level TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }
}

/// Trait for cache tier implementations.
///
/// All operations must be safe under concurrent callers; `put` is atomic
/// with respect to capacity accounting: no two concurrent writers may
/// simultaneously believe capacity is available when it is not.
#[async_trait]
pub trait TierStore<V>: Send + Sync {
    /// The tier's storage medium.
    fn kind(&self) -> TierKind;

    /// Gets a value. Expired or corrupt records are purged and reported
    /// as absent.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>>;

    /// Inserts a value, evicting lower-ranked residents if the tier is at
    /// capacity. Returns the number of entries evicted to make room.
    ///
    /// # Errors
    ///
    /// [`crate::CacheError::CapacityExceeded`] if the payload can never
    /// fit this tier.
    async fn put(&self, key: &str, entry: CacheEntry<V>) -> Result<u64>;

    /// Removes a key. Returns `true` if it was resident.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Returns every resident key matching `pattern`.
    async fn scan_keys(&self, pattern: &KeyPattern) -> Result<Vec<String>>;

    /// Purges entries past their expiry as of `now`; returns the count
    /// removed.
    async fn purge_expired(&self, now: SystemTime) -> Result<u64>;

    /// Removes all entries.
    async fn clear(&self) -> Result<()>;

    /// Number of resident entries.
    fn len(&self) -> u64;

    /// Estimated resident bytes.
    fn bytes_used(&self) -> u64;

    /// Returns `true` if the tier holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
