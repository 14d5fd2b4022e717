// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Error taxonomy for cache operations.
//!
//! Every variant carries owned data so errors can be cloned and fanned
//! out to all waiters of a coalesced load.

use thiserror::Error;

use crate::tier::TierKind;

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur in the cache engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A tier rejected a write. The engine falls back to the next tier,
    /// or drops the write silently if no tier accepts it.
    #[error("tier {tier} is at capacity")]
    CapacityExceeded {
        /// The tier that rejected the write.
        tier: TierKind,
    },

    /// A persisted record could not be decoded. Treated as a miss; the
    /// record is purged.
    #[error("corrupt cache entry: {reason}")]
    CorruptEntry {
        /// Why decoding failed.
        reason: String,
    },

    /// The caller-supplied loader failed. Propagated to every waiter of
    /// the in-flight load; nothing is cached.
    #[error("loader failed: {reason}")]
    LoaderFailed {
        /// The loader's error, rendered.
        reason: String,
    },

    /// The broadcast channel dropped or lagged. Non-fatal: the local
    /// cache remains authoritative and staleness stays bounded by TTL.
    #[error("sync channel unavailable: {reason}")]
    SyncUnavailable {
        /// What went wrong with the channel.
        reason: String,
    },

    /// A sensitive cache was configured without a master key. The engine
    /// refuses to store sensitive data unencrypted.
    #[error("cache requires encryption but no master key is configured")]
    EncryptionUnavailable,

    /// The cache profile failed validation at construction time.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Value serialization or cipher failure in the entry codec.
    #[error("codec failure: {0}")]
    Codec(String),

    /// A durable backend I/O fault.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl CacheError {
    /// Wraps a loader error, rendering it for fan-out to all waiters.
    pub fn loader(err: impl std::fmt::Display) -> Self {
        Self::LoaderFailed {
            reason: err.to_string(),
        }
    }

    /// Wraps a decode failure.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.to_string())
    }
}
