// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Declarative cache warming.
//!
//! Warming rules proactively populate a cache before the first request
//! needs the data. Rules are registered at construction, run once after a
//! configurable delay (so they never compete with startup work), in
//! priority order with dependencies honored, and each rule is caught
//! individually; one failing loader never blocks the rest. Results go
//! through the normal set path, so a warmed entry is indistinguishable
//! from an organically cached one.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};

use strata_tier::{CacheError, Priority, Result};

use crate::cache::CacheCore;
use crate::metrics::key_prefix;

type RuleLoader<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V>> + Send + Sync>;

/// One declarative warming rule: a key, the loader producing its value,
/// a priority, and optional dependencies on other rules' keys.
///
/// # Examples
///
/// ```
/// use strata::WarmingRule;
/// use strata_tier::Priority;
///
/// let rule = WarmingRule::new("config:feature-flags", || async {
///     Ok::<_, std::io::Error>(vec!["new-checkout".to_string()])
/// })
/// .with_priority(Priority::Critical);
/// assert_eq!(rule.key, "config:feature-flags");
/// ```
#[derive(Clone)]
pub struct WarmingRule<V> {
    /// Key the rule populates.
    pub key: String,
    /// Priority of the warmed entry, also the rule's execution rank.
    pub priority: Priority,
    /// Keys of rules that must run before this one.
    pub depends_on: Vec<String>,
    loader: RuleLoader<V>,
}

impl<V> WarmingRule<V> {
    /// A rule for `key` backed by `loader`, at [`Priority::Medium`].
    pub fn new<F, Fut, E>(key: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        Self {
            key: key.into(),
            priority: Priority::Medium,
            depends_on: Vec::new(),
            loader: Arc::new(move || {
                let fut = loader();
                Box::pin(async move { fut.await.map_err(CacheError::loader) })
            }),
        }
    }

    /// Sets the rule's priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Declares rules (by key) that must run before this one.
    #[must_use]
    pub fn depends_on(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = keys.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn load(&self) -> BoxFuture<'static, Result<V>> {
        (self.loader)()
    }
}

impl<V> fmt::Debug for WarmingRule<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmingRule")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// Orders rules by priority (highest first), then reshuffles so every
/// rule runs after its dependencies. Dependencies naming keys no rule
/// provides count as satisfied; a dependency cycle degrades to plain
/// priority order for the rules involved.
pub(crate) fn execution_order<V>(rules: &[WarmingRule<V>]) -> Vec<&WarmingRule<V>> {
    let mut by_priority: Vec<&WarmingRule<V>> = rules.iter().collect();
    by_priority.sort_by(|a, b| b.priority.cmp(&a.priority));

    let known: HashSet<&str> = rules.iter().map(|r| r.key.as_str()).collect();
    let mut done: HashSet<&str> = HashSet::new();
    let mut ordered: Vec<&WarmingRule<V>> = Vec::with_capacity(rules.len());

    while ordered.len() < by_priority.len() {
        let next = by_priority.iter().find(|rule| {
            !done.contains(rule.key.as_str())
                && rule
                    .depends_on
                    .iter()
                    .all(|dep| done.contains(dep.as_str()) || !known.contains(dep.as_str()))
        });
        match next {
            Some(rule) => {
                done.insert(rule.key.as_str());
                ordered.push(rule);
            }
            None => {
                // Cycle: run the stragglers in plain priority order.
                for rule in &by_priority {
                    if !done.contains(rule.key.as_str()) {
                        done.insert(rule.key.as_str());
                        ordered.push(rule);
                    }
                }
            }
        }
    }
    ordered
}

/// Runs every rule once, skipping keys that are already resident.
/// Returns the number of entries loaded.
pub(crate) async fn run_rules<V>(core: &CacheCore<V>) -> u64
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut loaded = 0;
    for rule in execution_order(&core.warming_rules) {
        // Idempotence: re-running rules must not duplicate or reload
        // entries that are already cached.
        if core.is_resident(&rule.key).await {
            continue;
        }
        match rule.load().await {
            Ok(value) => match core.write_through(&rule.key, value, None, rule.priority).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    tracing::warn!(
                        target: "strata",
                        cache = %core.profile.name,
                        key_prefix = %key_prefix(&rule.key),
                        error = %e,
                        "cache.error"
                    );
                }
            },
            Err(e) => {
                core.metrics.record_error();
                tracing::warn!(
                    target: "strata",
                    cache = %core.profile.name,
                    key_prefix = %key_prefix(&rule.key),
                    error = %e,
                    "cache.error"
                );
            }
        }
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(key: &str, priority: Priority) -> WarmingRule<u32> {
        WarmingRule::new(key, || async { Ok::<_, std::io::Error>(1) }).with_priority(priority)
    }

    #[test]
    fn higher_priority_rules_run_first() {
        let rules = vec![
            rule("low", Priority::Low),
            rule("critical", Priority::Critical),
            rule("medium", Priority::Medium),
        ];
        let order: Vec<&str> = execution_order(&rules).iter().map(|r| r.key.as_str()).collect();
        assert_eq!(order, vec!["critical", "medium", "low"]);
    }

    #[test]
    fn dependencies_run_before_dependents() {
        let rules = vec![
            rule("dependent", Priority::Critical).depends_on(["base"]),
            rule("base", Priority::Low),
        ];
        let order: Vec<&str> = execution_order(&rules).iter().map(|r| r.key.as_str()).collect();
        assert_eq!(order, vec!["base", "dependent"]);
    }

    #[test]
    fn unknown_dependencies_are_satisfied() {
        let rules = vec![rule("only", Priority::Medium).depends_on(["not-a-rule"])];
        assert_eq!(execution_order(&rules).len(), 1);
    }

    #[test]
    fn dependency_cycles_degrade_to_priority_order() {
        let rules = vec![
            rule("a", Priority::High).depends_on(["b"]),
            rule("b", Priority::Low).depends_on(["a"]),
        ];
        let order: Vec<&str> = execution_order(&rules).iter().map(|r| r.key.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }
}
