// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Integration tests for cross-instance synchronization.

use std::time::Duration;

use strata::{CacheProfile, NamedCache, SyncHub};

fn synced_profile(name: &str) -> CacheProfile {
    let mut profile = CacheProfile::new(name);
    profile.sync_enabled = true;
    profile
}

async fn sibling(name: &str, hub: &SyncHub) -> NamedCache<String> {
    NamedCache::builder(synced_profile(name))
        .sync_hub(hub.clone())
        .build()
        .await
        .expect("build")
}

/// Lets the listener tasks drain the broadcast channel.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_write_invalidates_the_siblings_stale_copy() {
    let hub = SyncHub::new();
    let a = sibling("sessions", &hub).await;
    let b = sibling("sessions", &hub).await;

    b.set("k", "stale".to_string()).await.expect("set");
    settle().await;

    a.set("k", "fresh".to_string()).await.expect("set");
    settle().await;

    // The write's origin keeps its own copy; the sibling dropped its
    // stale one and will reload on next use.
    assert_eq!(a.get("k").await, Some("fresh".to_string()));
    assert_eq!(b.get("k").await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn own_events_are_suppressed() {
    let hub = SyncHub::new();
    let a = sibling("sessions", &hub).await;

    a.set("k", "mine".to_string()).await.expect("set");
    settle().await;

    // If origin suppression failed the listener would have deleted the
    // instance's own fresh write.
    assert_eq!(a.get("k").await, Some("mine".to_string()));
    assert_eq!(a.metrics().sync_applied, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deletes_propagate_to_siblings() {
    let hub = SyncHub::new();
    let a = sibling("sessions", &hub).await;
    let b = sibling("sessions", &hub).await;

    a.set("k", "a-copy".to_string()).await.expect("set");
    b.set("k", "b-copy".to_string()).await.expect("set");
    settle().await;

    // B's set already invalidated A's copy; repopulate A silently by
    // loading fresh, then delete from B.
    a.set("k", "a-copy".to_string()).await.expect("set");
    settle().await;

    b.delete("k").await;
    settle().await;

    assert_eq!(a.get("k").await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clear_propagates_to_siblings() {
    let hub = SyncHub::new();
    let a = sibling("search-results", &hub).await;
    let b = sibling("search-results", &hub).await;

    a.set("q:1", "r1".to_string()).await.expect("set");
    a.set("q:2", "r2".to_string()).await.expect("set");
    settle().await;

    b.clear().await;
    settle().await;

    assert!(a.is_empty());
    assert!(a.metrics().sync_applied >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pattern_invalidations_propagate_to_siblings() {
    let hub = SyncHub::new();
    let a = sibling("users", &hub).await;
    let b = sibling("users", &hub).await;

    for key in ["user:1", "user:2", "order:1"] {
        a.set(key, "v".to_string()).await.expect("set");
    }
    settle().await;

    let removed = b.invalidate_by_pattern("user:*").await.expect("invalidate");
    // B itself held nothing; the event still reaches A.
    assert_eq!(removed, 0);
    settle().await;

    assert_eq!(a.get("user:1").await, None);
    assert_eq!(a.get("user:2").await, None);
    assert_eq!(a.get("order:1").await, Some("v".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn events_for_other_caches_are_ignored() {
    let hub = SyncHub::new();
    let users = sibling("users", &hub).await;
    let orders = sibling("orders", &hub).await;

    users.set("shared-key", "user-data".to_string()).await.expect("set");
    orders.set("shared-key", "order-data".to_string()).await.expect("set");
    settle().await;

    // Same hub, different cache names: neither instance reacts to the
    // other's events.
    assert_eq!(users.get("shared-key").await, Some("user-data".to_string()));
    assert_eq!(orders.get("shared-key").await, Some("order-data".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_disabled_profiles_stay_silent() {
    let hub = SyncHub::new();
    let mut quiet_profile = CacheProfile::new("quiet");
    quiet_profile.sync_enabled = false;

    let quiet: NamedCache<String> = NamedCache::builder(quiet_profile)
        .sync_hub(hub.clone())
        .build()
        .await
        .expect("build");
    let listener = sibling("quiet", &hub).await;

    listener.set("k", "copy".to_string()).await.expect("set");
    settle().await;

    quiet.set("k", "update".to_string()).await.expect("set");
    settle().await;

    // No event was published, so the sibling keeps its copy.
    assert_eq!(listener.get("k").await, Some("copy".to_string()));
    assert_eq!(quiet.metrics().sync_published, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_detaches_the_listener() {
    let hub = SyncHub::new();
    let a = sibling("sessions", &hub).await;
    let b = sibling("sessions", &hub).await;

    b.set("k", "kept".to_string()).await.expect("set");
    settle().await;
    b.shutdown();
    settle().await;

    a.set("k", "update".to_string()).await.expect("set");
    settle().await;

    // B stopped listening, so its copy survives A's write.
    assert_eq!(b.get("k").await, Some("kept".to_string()));
}
