// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! The persisted record shape for durable tiers.

use serde::{Deserialize, Serialize};

use crate::entry::ms_to_system_time;

/// Version tag written into every persisted envelope. A reader that
/// encounters any other value must treat the record as absent rather than
/// attempt to parse the payload.
pub const SCHEMA_VERSION: u32 = 1;

/// Fixed metadata overhead charged per envelope when accounting tier
/// bytes, on top of the payload length.
pub const ENVELOPE_OVERHEAD_BYTES: u64 = 40;

/// A cache entry as stored at rest in a durable tier.
///
/// The payload holds the value after serialization and any compression
/// and encryption the codec applied; the flags record which transforms to
/// reverse on read. Timestamps are signed milliseconds since the Unix
/// epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryEnvelope {
    /// Format version; see [`SCHEMA_VERSION`].
    pub schema_version: u32,
    /// Stable ordinal of the entry's [`crate::Priority`].
    pub priority: u8,
    /// Creation time, epoch milliseconds.
    pub created_at_ms: i64,
    /// Expiry time, epoch milliseconds.
    pub expires_at_ms: i64,
    /// Accesses recorded before the entry was persisted.
    pub access_count: u32,
    /// Whether the payload was compressed (before any encryption).
    pub is_compressed: bool,
    /// Whether the payload was encrypted (after any compression).
    pub is_encrypted: bool,
    /// The transformed value bytes.
    pub payload: Vec<u8>,
}

impl EntryEnvelope {
    /// Bytes this envelope is charged against a tier's budget.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.payload.len() as u64 + ENVELOPE_OVERHEAD_BYTES
    }

    /// Expiry check against an epoch-milliseconds clock reading.
    #[must_use]
    pub fn is_expired_at_ms(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at_ms
    }

    /// Expiry check against a `SystemTime`.
    #[must_use]
    pub fn is_expired_at(&self, now: std::time::SystemTime) -> bool {
        now > ms_to_system_time(self.expires_at_ms)
    }
}
