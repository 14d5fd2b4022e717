// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Per-cache configuration.
//!
//! Every named cache is constructed from a [`CacheProfile`]. There is no
//! global mutable configuration: each cache's policy is explicit, local,
//! and immutable after construction. Validation happens at construction
//! time, never at first use.

use std::time::Duration;

use strata_tier::{CacheError, KeyPattern, Result, TierDescriptor, TierKind};

/// What a cascade does to its target cache.
#[derive(Clone, Debug)]
pub enum CascadeAction {
    /// Clear the target cache entirely.
    ClearAll,
    /// Invalidate the target by pattern.
    Invalidate(KeyPattern),
}

/// A declarative dependency between caches: when an invalidation in this
/// cache removes a key matching `when`, apply `action` to the cache named
/// `target` within the same call.
///
/// A cascade may not name its own cache, and cascade application never
/// re-triggers the target's cascades, so chains cannot recurse.
#[derive(Clone, Debug)]
pub struct CascadeRule {
    /// Pattern the removed keys are matched against.
    pub when: KeyPattern,
    /// Name of the dependent cache.
    pub target: String,
    /// What to do to the dependent cache.
    pub action: CascadeAction,
}

impl CascadeRule {
    /// A rule clearing `target` entirely when a removed key matches
    /// `when`.
    pub fn clear_all(when: KeyPattern, target: impl Into<String>) -> Self {
        Self {
            when,
            target: target.into(),
            action: CascadeAction::ClearAll,
        }
    }

    /// A rule invalidating `pattern` in `target` when a removed key
    /// matches `when`.
    pub fn invalidate(when: KeyPattern, target: impl Into<String>, pattern: KeyPattern) -> Self {
        Self {
            when,
            target: target.into(),
            action: CascadeAction::Invalidate(pattern),
        }
    }
}

/// Configuration for one named cache.
///
/// Owned exclusively by the cache instance once built. The profile-level
/// `max_entries` / `max_memory_bytes` ceilings bound the volatile tier in
/// addition to that tier's own descriptor bounds (the smaller wins).
///
/// # Examples
///
/// ```
/// use strata::CacheProfile;
/// use strata_tier::TierDescriptor;
/// use std::time::Duration;
///
/// let mut profile = CacheProfile::new("user-profiles");
/// profile.default_ttl = Duration::from_secs(600);
/// profile.tiers = vec![
///     TierDescriptor::volatile(5_000, 16 * 1024 * 1024),
///     TierDescriptor::durable_small(4 * 1024 * 1024, 256 * 1024),
/// ];
/// assert!(profile.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct CacheProfile {
    /// Name used in logs, metrics and sync events.
    pub name: String,
    /// Entry ceiling applied to the volatile tier.
    pub max_entries: u64,
    /// Byte ceiling applied to the volatile tier.
    pub max_memory_bytes: u64,
    /// Lifetime of entries written without an explicit TTL.
    pub default_ttl: Duration,
    /// Tiers to populate on write, ordered fastest→slowest.
    pub tiers: Vec<TierDescriptor>,
    /// Seal payloads in durable tiers with the installation master key.
    /// A sensitive cache without a key fails construction.
    pub encrypt_sensitive: bool,
    /// Compress durable payloads above this serialized size.
    pub compress_above_bytes: Option<u64>,
    /// Broadcast mutations to sibling instances sharing durable tiers.
    pub sync_enabled: bool,
    /// Run registered warming rules after construction.
    pub warming_enabled: bool,
    /// Delay before warming starts, leaving startup work uncontended.
    pub warming_delay: Duration,
    /// Age past which a `get_or_set` hit triggers a background reload.
    /// Must stay below `default_ttl`.
    pub refresh_threshold: Option<Duration>,
    /// Interval of the background sweep that purges expired entries.
    pub sweep_interval: Duration,
    /// Dependent-cache invalidation rules.
    pub cascades: Vec<CascadeRule>,
}

impl CacheProfile {
    /// A profile with conservative defaults: one unbounded-descriptor
    /// volatile tier capped by the profile ceilings, five-minute TTL,
    /// sync and warming off.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_entries: 10_000,
            max_memory_bytes: 64 * 1024 * 1024,
            default_ttl: Duration::from_secs(300),
            tiers: vec![TierDescriptor::volatile(u64::MAX, u64::MAX)],
            encrypt_sensitive: false,
            compress_above_bytes: None,
            sync_enabled: false,
            warming_enabled: false,
            warming_delay: Duration::from_secs(2),
            refresh_threshold: None,
            sweep_interval: Duration::from_secs(30),
            cascades: Vec::new(),
        }
    }

    /// Checks the profile invariants.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidConfig`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CacheError::InvalidConfig("cache name must not be empty".into()));
        }
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig("max_entries must be positive".into()));
        }
        if self.max_memory_bytes == 0 {
            return Err(CacheError::InvalidConfig("max_memory_bytes must be positive".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(CacheError::InvalidConfig("default_ttl must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig("sweep_interval must be positive".into()));
        }
        if self.tiers.is_empty() {
            return Err(CacheError::InvalidConfig("at least one tier is required".into()));
        }
        for window in self.tiers.windows(2) {
            if window[0].kind >= window[1].kind {
                return Err(CacheError::InvalidConfig(format!(
                    "tiers must be unique and ordered fastest to slowest ({} before {})",
                    window[0].kind, window[1].kind
                )));
            }
        }
        if let Some(threshold) = self.refresh_threshold
            && threshold >= self.default_ttl
        {
            return Err(CacheError::InvalidConfig(
                "refresh_threshold must be below default_ttl".into(),
            ));
        }
        for rule in &self.cascades {
            if rule.target.is_empty() {
                return Err(CacheError::InvalidConfig("cascade target must not be empty".into()));
            }
            if rule.target == self.name {
                return Err(CacheError::InvalidConfig(format!(
                    "cascade in cache {:?} must not target itself",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Whether any configured tier is durable.
    #[must_use]
    pub fn has_durable_tier(&self) -> bool {
        self.tiers.iter().any(|t| t.kind.is_durable())
    }

    pub(crate) fn effective_descriptor(&self, desc: &TierDescriptor) -> TierDescriptor {
        let mut desc = desc.clone();
        if desc.kind == TierKind::Volatile {
            desc.max_entries = desc.max_entries.min(self.max_entries);
            desc.max_bytes = desc.max_bytes.min(self.max_memory_bytes);
        }
        desc
    }
}
