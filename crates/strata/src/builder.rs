// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Cache construction.
//!
//! [`NamedCacheBuilder`] validates the profile, assembles the tier
//! hierarchy through the codec, hydrates durable indexes, registers the
//! cache for cascades, and starts the background tasks. Everything that
//! can be rejected is rejected here, never at first use.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;

use strata_codec::{EntryCodec, MasterKey};
use strata_durable::{DurableBackend, DurableTier, MemoryBackend};
use strata_memory::VolatileTier;
use strata_tier::{CacheError, Result, TierKind, TierStore};

use crate::cache::{CacheCore, NamedCache};
use crate::flight::FlightGroup;
use crate::invalidate::{CacheHandle, CacheRegistry};
use crate::maintenance::{spawn_sweeper, spawn_sync_listener, spawn_warming};
use crate::metrics::CacheMetrics;
use crate::profile::CacheProfile;
use crate::refresh::RefreshAhead;
use crate::sync::SyncHub;
use crate::warming::WarmingRule;

/// Builder for a [`NamedCache`].
///
/// # Examples
///
/// ```
/// use strata::{CacheProfile, NamedCache, SyncHub};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let hub = SyncHub::new();
/// let mut profile = CacheProfile::new("search-results");
/// profile.sync_enabled = true;
///
/// let cache: NamedCache<Vec<String>> = NamedCache::builder(profile)
///     .sync_hub(hub)
///     .build()
///     .await?;
/// assert_eq!(cache.name(), "search-results");
/// # Ok::<(), strata::CacheError>(())
/// # });
/// ```
pub struct NamedCacheBuilder<V> {
    profile: CacheProfile,
    master_key: Option<MasterKey>,
    hub: Option<SyncHub>,
    registry: Option<CacheRegistry>,
    rules: Vec<WarmingRule<V>>,
    backends: HashMap<TierKind, Arc<dyn DurableBackend>>,
}

impl<V> NamedCacheBuilder<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(profile: CacheProfile) -> Self {
        Self {
            profile,
            master_key: None,
            hub: None,
            registry: None,
            rules: Vec::new(),
            backends: HashMap::new(),
        }
    }

    /// Supplies the per-installation key sealing sensitive payloads.
    /// Required when the profile sets `encrypt_sensitive`.
    #[must_use]
    pub fn master_key(mut self, key: MasterKey) -> Self {
        self.master_key = Some(key);
        self
    }

    /// Connects the cache to a sync hub. Effective only when the profile
    /// enables sync.
    #[must_use]
    pub fn sync_hub(mut self, hub: SyncHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Registers the cache in a registry so cascades can reach it and it
    /// can reach its cascade targets.
    #[must_use]
    pub fn registry(mut self, registry: CacheRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Adds a warming rule. Rules run once after the profile's warming
    /// delay when warming is enabled, and on [`NamedCache::run_warming`].
    #[must_use]
    pub fn warming_rule(mut self, rule: WarmingRule<V>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Supplies the storage backend for a durable tier kind. Tiers
    /// without an explicit backend fall back to a process-local
    /// [`MemoryBackend`].
    #[must_use]
    pub fn durable_backend(mut self, kind: TierKind, backend: Arc<dyn DurableBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    /// Validates the configuration, assembles the tiers, and starts the
    /// background tasks. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidConfig`] for profile violations,
    /// [`CacheError::EncryptionUnavailable`] for a sensitive profile
    /// without a master key, and backend faults from durable index
    /// hydration.
    pub async fn build(self) -> Result<NamedCache<V>> {
        self.profile.validate()?;

        if self.profile.encrypt_sensitive && self.master_key.is_none() {
            return Err(CacheError::EncryptionUnavailable);
        }
        let sealing_key = if self.profile.encrypt_sensitive {
            self.master_key.as_ref()
        } else {
            None
        };
        let codec = Arc::new(EntryCodec::new(self.profile.compress_above_bytes, sealing_key));

        let mut tiers: Vec<Arc<dyn TierStore<V>>> = Vec::with_capacity(self.profile.tiers.len());
        for desc in &self.profile.tiers {
            let desc = self.profile.effective_descriptor(desc);
            match desc.kind {
                TierKind::Volatile => {
                    tiers.push(Arc::new(VolatileTier::new(&desc)));
                }
                kind => {
                    let backend = self
                        .backends
                        .get(&kind)
                        .map(Arc::clone)
                        .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
                    let tier = DurableTier::new(&desc, backend, Arc::clone(&codec));
                    let restored = tier.hydrate().await?;
                    if restored > 0 {
                        tracing::debug!(
                            target: "strata",
                            cache = %self.profile.name,
                            tier = %kind,
                            restored,
                            "durable index hydrated"
                        );
                    }
                    tiers.push(Arc::new(tier));
                }
            }
        }

        let hub = if self.profile.sync_enabled {
            self.hub
        } else {
            None
        };
        let receiver = hub.as_ref().map(SyncHub::subscribe);

        let core = Arc::new(CacheCore {
            refresh: self.profile.refresh_threshold.map(RefreshAhead::new),
            profile: self.profile,
            tiers,
            flight: FlightGroup::new(),
            metrics: Arc::new(CacheMetrics::new()),
            hub,
            origin_id: uuid::Uuid::new_v4().to_string(),
            registry: self.registry,
            warming_rules: self.rules,
            shutdown: CancellationToken::new(),
        });

        if let Some(registry) = &core.registry {
            let handle: Arc<dyn CacheHandle> = Arc::clone(&core) as Arc<dyn CacheHandle>;
            registry.register(&handle);
        }

        spawn_sweeper(&core);
        if let Some(receiver) = receiver {
            spawn_sync_listener(&core, receiver);
        }
        if core.profile.warming_enabled && !core.warming_rules.is_empty() {
            spawn_warming(&core);
        }

        Ok(NamedCache { core })
    }
}

impl<V> fmt::Debug for NamedCacheBuilder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedCacheBuilder")
            .field("profile", &self.profile.name)
            .field("warming_rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}
