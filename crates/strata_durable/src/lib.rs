// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Durable tiers for the strata multi-tier cache.
//!
//! [`DurableTier`] stores codec-produced envelopes in a pluggable,
//! byte-oriented [`DurableBackend`]. Two tier flavors exist: durable-small
//! (a few megabytes, oversized payloads rejected) and durable-bulk
//! (larger budget, in-memory key index for pattern scans). The concrete
//! storage medium stays behind the backend seam; [`MemoryBackend`] and
//! [`FileBackend`] are provided.

pub mod backend;
pub mod tier;

#[doc(inline)]
pub use backend::{DurableBackend, FileBackend, MemoryBackend};
#[doc(inline)]
pub use tier::DurableTier;
