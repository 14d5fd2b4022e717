// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Background task lifecycle.
//!
//! Each cache runs up to three periodic tasks: the expiry sweep, the
//! sync listener, and the one-shot warming run. All of them hold only a
//! weak reference to the cache core and watch its cancellation token, so
//! they stop cleanly on [`crate::NamedCache::shutdown`] or when the last
//! cache handle drops.

use std::sync::Arc;
use std::time::SystemTime;

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::broadcast;

use crate::cache::CacheCore;
use crate::sync::InvalidationEvent;
use crate::warming;

use strata_tier::CacheError;

/// Periodically purges entries past their expiry from every tier,
/// independent of capacity pressure.
pub(crate) fn spawn_sweeper<V>(core: &Arc<CacheCore<V>>)
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let weak = Arc::downgrade(core);
    let period = core.profile.sweep_interval;
    let token = core.shutdown.clone();

    drop(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the sweep starts
        // one full period after construction.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(core) = weak.upgrade() else { break };
                    sweep_once(&core).await;
                }
            }
        }
    }));
}

async fn sweep_once<V>(core: &CacheCore<V>)
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let now = SystemTime::now();
    for tier in &core.tiers {
        match tier.purge_expired(now).await {
            Ok(0) => {}
            Ok(purged) => core.metrics.record_expirations(purged),
            Err(e) => {
                core.metrics.record_error();
                tracing::warn!(
                    target: "strata",
                    cache = %core.profile.name,
                    tier = %tier.kind(),
                    error = %e,
                    "cache.error"
                );
            }
        }
    }
}

/// Applies sibling mutation events, dropping stale local copies.
pub(crate) fn spawn_sync_listener<V>(
    core: &Arc<CacheCore<V>>,
    mut receiver: broadcast::Receiver<InvalidationEvent>,
) where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let weak = Arc::downgrade(core);
    let token = core.shutdown.clone();

    drop(tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(event) => {
                        let Some(core) = weak.upgrade() else { break };
                        core.apply_remote(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Best-effort delivery: missed events mean a
                        // sibling keeps a stale copy until its TTL.
                        let Some(core) = weak.upgrade() else { break };
                        core.metrics.record_sync_dropped();
                        let err = CacheError::SyncUnavailable {
                            reason: format!("receiver lagged, {missed} events lost"),
                        };
                        tracing::warn!(
                            target: "strata",
                            cache = %core.profile.name,
                            error = %err,
                            "cache.sync"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }));
}

/// Runs warming rules once, after the configured delay.
pub(crate) fn spawn_warming<V>(core: &Arc<CacheCore<V>>)
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let weak = Arc::downgrade(core);
    let delay = core.profile.warming_delay;
    let token = core.shutdown.clone();

    drop(tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        let Some(core) = weak.upgrade() else { return };
        let loaded = warming::run_rules(&core).await;
        tracing::debug!(
            target: "strata",
            cache = %core.profile.name,
            loaded,
            "warming complete"
        );
    }));
}
