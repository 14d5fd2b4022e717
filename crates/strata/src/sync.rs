// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Cross-instance mutation broadcasting.
//!
//! A [`SyncHub`] fans [`InvalidationEvent`] descriptors out to every
//! cache instance subscribed to it. Events carry only what is needed to
//! drop stale local copies, never payloads, so the channel stays small
//! and no sensitive plaintext crosses it. Delivery is at-most-once and
//! best-effort: a lost event means a sibling serves its copy until TTL
//! expiry, so staleness stays bounded.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

/// Default buffer size for the broadcast channel. A slow receiver that
/// falls further behind loses the oldest events.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// What a mutation did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A key was written; siblings drop their now-stale copy.
    Set,
    /// A key was deleted.
    Delete,
    /// The whole cache was cleared.
    Clear,
    /// A pattern invalidation removed matching keys.
    Invalidate,
}

/// Descriptor of one mutating operation, consumed once by each sibling
/// and then discarded. Never persisted, never carries entry data.
#[derive(Clone, Debug)]
pub struct InvalidationEvent {
    /// Name of the cache the mutation happened in.
    pub cache: String,
    /// The mutation.
    pub kind: EventKind,
    /// Key for `Set` / `Delete`.
    pub key: Option<String>,
    /// Pattern grammar string for `Invalidate`.
    pub pattern: Option<String>,
    /// Identity of the emitting instance; receivers ignore their own.
    pub origin_id: String,
    /// Emission time, epoch milliseconds.
    pub timestamp_ms: i64,
}

impl InvalidationEvent {
    pub(crate) fn new(
        cache: impl Into<String>,
        kind: EventKind,
        key: Option<String>,
        pattern: Option<String>,
        origin_id: impl Into<String>,
    ) -> Self {
        Self {
            cache: cache.into(),
            kind,
            key,
            pattern,
            origin_id: origin_id.into(),
            timestamp_ms: now_ms(),
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

/// The broadcast bus shared by cache instances that see the same durable
/// tiers.
///
/// Cloning a hub yields another handle onto the same channel. The hub is
/// the generic seam for the synchronization medium: a process-external
/// transport can forward events into and out of a hub without the engine
/// knowing.
///
/// # Examples
///
/// ```
/// use strata::SyncHub;
///
/// let hub = SyncHub::new();
/// let receiver = hub.subscribe();
/// assert_eq!(hub.receiver_count(), 1);
/// # drop(receiver);
/// ```
#[derive(Clone)]
pub struct SyncHub {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl SyncHub {
    /// A hub with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// A hub with a custom buffer size.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// A hub wrapped in an `Arc` for sharing.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers reached; zero (no subscribers) is
    /// not an error, there is simply nobody to notify.
    pub fn publish(&self, event: InvalidationEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Subscribes to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SyncHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHub")
            .field("receiver_count", &self.receiver_count())
            .finish()
    }
}
