// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Batch eviction victim selection.
//!
//! Tiers call [`select_victims`] before a write that would breach their
//! ceilings. Selection works on a metadata snapshot; callers must re-check
//! recency at removal time (see [`select_victims`] docs) so an entry
//! accessed after the snapshot is never evicted.

use std::time::SystemTime;

use crate::Priority;

/// Fraction of resident entries evicted when the entry-count ceiling is
/// breached.
pub const COUNT_EVICTION_FRACTION: f64 = 0.10;

/// Fraction of resident entries evicted when the byte ceiling is
/// breached. Both checks are independent; when both fire the larger
/// batch wins.
pub const BYTES_EVICTION_FRACTION: f64 = 0.20;

/// Metadata snapshot of one resident entry, input to victim selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VictimCandidate {
    /// The entry's key.
    pub key: String,
    /// Eviction priority; lower evicts first.
    pub priority: Priority,
    /// Recency at snapshot time; older evicts first within a priority.
    pub last_accessed_at: SystemTime,
    /// Estimated resident bytes, for accounting by the caller.
    pub bytes: u64,
}

/// Ranks a snapshot of resident entries and returns the keys to evict,
/// lowest-ranked first.
///
/// Entries sort by `(priority ascending, last_accessed_at ascending)`:
/// background data goes before critical data, and within a priority the
/// least recently used entry goes first. The batch size is
/// [`COUNT_EVICTION_FRACTION`] of the resident count for a count breach
/// and [`BYTES_EVICTION_FRACTION`] for a byte breach, always at least one
/// entry when a ceiling is breached.
///
/// The snapshot is not authoritative: a caller must remove victims with a
/// compare-on-remove (skip the key if its `last_accessed_at` advanced past
/// the snapshot), which keeps recently-touched entries resident without
/// holding the tier locked across selection.
#[must_use]
pub fn select_victims(
    mut candidates: Vec<VictimCandidate>,
    over_count: bool,
    over_bytes: bool,
) -> Vec<VictimCandidate> {
    if candidates.is_empty() || (!over_count && !over_bytes) {
        return Vec::new();
    }

    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.last_accessed_at.cmp(&b.last_accessed_at))
    });

    let total = candidates.len();
    let fraction = if over_bytes {
        BYTES_EVICTION_FRACTION
    } else {
        COUNT_EVICTION_FRACTION
    };
    #[allow(
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation,
        reason = "fraction of a collection length is small and non-negative"
    )]
    let batch = ((total as f64 * fraction).ceil() as usize).clamp(1, total);

    candidates.truncate(batch);
    candidates
}
