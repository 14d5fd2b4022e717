// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Cached values and their bookkeeping metadata.
//!
//! [`CacheEntry`] wraps a value with creation/expiry timestamps, access
//! statistics and an eviction [`Priority`]. Tiers use this metadata for
//! expiration checks and victim selection.

use std::{
    ops::Deref,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Eviction priority of a cache entry.
///
/// Lower priorities are evicted first. The ordinal values are stable and
/// appear in the persisted envelope, so variants must never be reordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    /// Prefetched or speculative data; first to go.
    Background = 1,
    /// Rarely-read data.
    Low = 2,
    /// The default for organically cached values.
    Medium = 3,
    /// Hot-path data.
    High = 4,
    /// Evicted only when nothing lower-ranked remains.
    Critical = 5,
}

impl Priority {
    /// Returns the stable ordinal used in persisted envelopes.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a persisted ordinal. Returns `None` for unknown values so
    /// readers can treat the record as corrupt instead of guessing.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Background),
            2 => Some(Self::Low),
            3 => Some(Self::Medium),
            4 => Some(Self::High),
            5 => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// A cached value with associated metadata.
///
/// Invariant: `expires_at > created_at`. An entry observed after
/// `now > expires_at` is logically absent; tiers purge it on next touch.
///
/// # Examples
///
/// ```
/// use strata_tier::{CacheEntry, Priority};
/// use std::time::Duration;
///
/// let entry = CacheEntry::new("data".to_string(), Duration::from_secs(60));
/// assert_eq!(entry.value(), "data");
/// assert_eq!(entry.priority(), Priority::Medium);
/// assert!(!entry.is_expired());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: V,
    created_at: SystemTime,
    expires_at: SystemTime,
    access_count: u32,
    last_accessed_at: SystemTime,
    priority: Priority,
    is_compressed: bool,
    is_encrypted: bool,
}

impl<V> CacheEntry<V> {
    /// Creates an entry expiring `ttl` from now with [`Priority::Medium`].
    ///
    /// A zero `ttl` is bumped to one millisecond to preserve the
    /// `expires_at > created_at` invariant.
    pub fn new(value: V, ttl: Duration) -> Self {
        Self::with_priority(value, ttl, Priority::Medium)
    }

    /// Creates an entry expiring `ttl` from now with the given priority.
    pub fn with_priority(value: V, ttl: Duration, priority: Priority) -> Self {
        let created_at = SystemTime::now();
        let ttl = ttl.max(Duration::from_millis(1));
        Self {
            value,
            created_at,
            expires_at: created_at + ttl,
            access_count: 0,
            last_accessed_at: created_at,
            priority,
            is_compressed: false,
            is_encrypted: false,
        }
    }

    /// Recreates an entry from persisted metadata.
    ///
    /// Used when decoding an envelope read back from a durable tier.
    #[expect(clippy::too_many_arguments, reason = "mirrors the persisted envelope fields")]
    #[must_use]
    pub fn from_raw_parts(
        value: V,
        created_at: SystemTime,
        expires_at: SystemTime,
        access_count: u32,
        last_accessed_at: SystemTime,
        priority: Priority,
        is_compressed: bool,
        is_encrypted: bool,
    ) -> Self {
        Self {
            value,
            created_at,
            expires_at: expires_at.max(created_at + Duration::from_millis(1)),
            access_count,
            last_accessed_at,
            priority,
            is_compressed,
            is_encrypted,
        }
    }

    /// Returns a reference to the cached value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns the inner value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// Timestamp the entry was created.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Timestamp after which the entry is logically absent.
    #[must_use]
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Number of recorded accesses since creation.
    #[must_use]
    pub fn access_count(&self) -> u32 {
        self.access_count
    }

    /// Timestamp of the most recent access (creation counts as one).
    #[must_use]
    pub fn last_accessed_at(&self) -> SystemTime {
        self.last_accessed_at
    }

    /// Eviction priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether the persisted payload was compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.is_compressed
    }

    /// Whether the persisted payload was encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.is_encrypted
    }

    /// Returns `true` once `now` is strictly past `expires_at`.
    ///
    /// An entry whose expiry equals `now` is still returned; one
    /// millisecond later it is absent.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }

    /// Expiry check against the system clock.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Age of the entry since creation, zero if the clock went backwards.
    #[must_use]
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or_default()
    }

    /// Records an access: bumps the counter and refreshes recency.
    pub fn touch(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = SystemTime::now();
    }

    /// Caps the expiry at `at`, e.g. when a tier carries a shorter TTL
    /// override than the entry itself. The creation invariant is kept.
    pub fn clamp_expiry(&mut self, at: SystemTime) {
        let floor = self.created_at + Duration::from_millis(1);
        self.expires_at = self.expires_at.min(at).max(floor);
    }
}

impl<V> Deref for CacheEntry<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Converts a `SystemTime` to signed milliseconds since the Unix epoch,
/// the representation used by the persisted envelope.
#[must_use]
pub fn system_time_to_ms(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

/// Inverse of [`system_time_to_ms`].
#[must_use]
pub fn ms_to_system_time(ms: i64) -> SystemTime {
    if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_millis(ms.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_is_not_expired() {
        let entry = CacheEntry::new(42, Duration::from_secs(3600));
        assert!(!entry.is_expired());
        assert!(entry.expires_at() > entry.created_at());
    }

    #[test]
    fn entry_past_expiry_is_absent() {
        let entry = CacheEntry::new(42, Duration::from_millis(1));
        let later = entry.expires_at() + Duration::from_millis(1);
        assert!(entry.is_expired_at(later));
    }

    #[test]
    fn entry_at_exact_expiry_is_still_present() {
        let entry = CacheEntry::new(42, Duration::from_secs(60));
        assert!(!entry.is_expired_at(entry.expires_at()));
    }

    #[test]
    fn zero_ttl_keeps_expiry_invariant() {
        let entry = CacheEntry::new(42, Duration::ZERO);
        assert!(entry.expires_at() > entry.created_at());
    }

    #[test]
    fn touch_updates_access_metadata() {
        let mut entry = CacheEntry::new("v", Duration::from_secs(60));
        let before = entry.last_accessed_at();
        entry.touch();
        entry.touch();
        assert_eq!(entry.access_count(), 2);
        assert!(entry.last_accessed_at() >= before);
    }

    #[test]
    fn clamp_expiry_never_precedes_creation() {
        let mut entry = CacheEntry::new("v", Duration::from_secs(60));
        entry.clamp_expiry(entry.created_at() - Duration::from_secs(5));
        assert!(entry.expires_at() > entry.created_at());
    }

    #[test]
    fn clamp_expiry_shortens_but_never_extends() {
        let mut entry = CacheEntry::new("v", Duration::from_secs(60));
        let original = entry.expires_at();
        entry.clamp_expiry(original + Duration::from_secs(600));
        assert_eq!(entry.expires_at(), original);

        let shorter = entry.created_at() + Duration::from_secs(10);
        entry.clamp_expiry(shorter);
        assert_eq!(entry.expires_at(), shorter);
    }

    #[test]
    fn priority_ordinals_round_trip() {
        for p in [
            Priority::Background,
            Priority::Low,
            Priority::Medium,
            Priority::High,
            Priority::Critical,
        ] {
            assert_eq!(Priority::from_u8(p.as_u8()), Some(p));
        }
        assert_eq!(Priority::from_u8(0), None);
        assert_eq!(Priority::from_u8(6), None);
    }

    #[test]
    fn priority_ordering_matches_eviction_rank() {
        assert!(Priority::Background < Priority::Low);
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn epoch_ms_round_trip() {
        let now = SystemTime::now();
        let ms = system_time_to_ms(now);
        let back = ms_to_system_time(ms);
        let delta = now
            .duration_since(back)
            .unwrap_or_else(|e| e.duration());
        assert!(delta < Duration::from_millis(1));
    }
}
