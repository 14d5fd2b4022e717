// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! A multi-tier, policy-driven key/value cache engine.
//!
//! Each [`NamedCache`] is an explicit, independently configured instance
//! with its own capacity, TTL, priority defaults, tier set and sync
//! scope, built from a [`CacheProfile`] and passed around by the embedder;
//! there are no process-wide singletons. A cache probes its tiers
//! fastest-first, promotes hits into faster tiers, coalesces concurrent
//! misses into a single loader execution, and pushes mutation events to
//! sibling instances over a [`SyncHub`].
//!
//! # Examples
//!
//! ```
//! use strata::{CacheProfile, NamedCache};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let cache: NamedCache<u64> = NamedCache::builder(CacheProfile::new("scores"))
//!     .build()
//!     .await?;
//!
//! let score = cache
//!     .get_or_set("player:9", || async { Ok::<_, std::io::Error>(4200) })
//!     .await?;
//! assert_eq!(score, 4200);
//! # Ok::<(), strata::CacheError>(())
//! # });
//! ```

pub mod builder;
pub mod cache;
mod flight;
pub mod invalidate;
mod maintenance;
pub mod metrics;
pub mod profile;
mod refresh;
pub mod sync;
pub mod warming;

#[doc(inline)]
pub use builder::NamedCacheBuilder;
#[doc(inline)]
pub use cache::NamedCache;
#[doc(inline)]
pub use invalidate::CacheRegistry;
#[doc(inline)]
pub use metrics::{CacheMetrics, MetricsSnapshot};
#[doc(inline)]
pub use profile::{CacheProfile, CascadeAction, CascadeRule};
#[doc(inline)]
pub use sync::{EventKind, InvalidationEvent, SyncHub};
#[doc(inline)]
pub use warming::WarmingRule;

#[doc(inline)]
pub use strata_codec::MasterKey;
#[doc(inline)]
pub use strata_durable::{DurableBackend, FileBackend, MemoryBackend};
#[doc(inline)]
pub use strata_tier::{
    CacheEntry, CacheError, KeyPattern, Priority, Result, TierDescriptor, TierKind,
};
