// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Cross-cache invalidation plumbing.
//!
//! Cascades are resolved through a [`CacheRegistry`] of type-erased
//! handles, so a cache of user profiles can clear a cache of search
//! results without knowing its value type. Registration is explicit:
//! caches are plain instances wired together at construction, never
//! process-wide singletons.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;

use strata_tier::KeyPattern;

/// Type-erased operations a cascade can apply to a dependent cache.
#[async_trait]
pub trait CacheHandle: Send + Sync {
    /// The cache's profile name.
    fn name(&self) -> &str;

    /// Pattern-invalidates the cache without re-evaluating its own
    /// cascades; returns the number of keys removed.
    async fn cascade_invalidate(&self, pattern: &KeyPattern) -> u64;

    /// Clears the cache without re-evaluating its own cascades.
    async fn cascade_clear(&self);
}

/// A directory of live cache instances, keyed by name.
///
/// Holds weak references only: dropping a cache unregisters it
/// implicitly, and a cascade against a dropped target is a logged no-op.
#[derive(Clone, Default)]
pub struct CacheRegistry {
    inner: Arc<RwLock<HashMap<String, Weak<dyn CacheHandle>>>>,
}

impl CacheRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, handle: &Arc<dyn CacheHandle>) {
        self.inner
            .write()
            .insert(handle.name().to_string(), Arc::downgrade(handle));
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<dyn CacheHandle>> {
        self.inner.read().get(name).and_then(Weak::upgrade)
    }

    /// Number of registered names, live or not. Mostly useful in tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns `true` if nothing was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("registered", &self.inner.read().len())
            .finish()
    }
}
