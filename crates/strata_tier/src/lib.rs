// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Core vocabulary for the strata multi-tier cache.
//!
//! This crate defines the types every tier backend and the cache façade
//! share: [`CacheEntry`] with its expiry/priority metadata, the
//! [`TierStore`] contract, [`KeyPattern`] matching for invalidation and
//! scans, the persisted [`EntryEnvelope`] shape, and the batch eviction
//! policy. Implement [`TierStore`] to plug a new storage medium into a
//! cache hierarchy.

pub mod entry;
pub mod envelope;
pub mod error;
pub mod pattern;
pub mod policy;
pub mod tier;

#[doc(inline)]
pub use entry::{CacheEntry, Priority};
#[doc(inline)]
pub use envelope::{ENVELOPE_OVERHEAD_BYTES, EntryEnvelope, SCHEMA_VERSION};
#[doc(inline)]
pub use error::{CacheError, Result};
#[doc(inline)]
pub use pattern::KeyPattern;
#[doc(inline)]
pub use tier::{TierDescriptor, TierKind, TierStore};
