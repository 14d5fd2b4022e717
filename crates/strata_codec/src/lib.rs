// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Entry codec for the strata multi-tier cache.
//!
//! [`EntryCodec`] turns a typed [`strata_tier::CacheEntry`] into a
//! storable [`strata_tier::EntryEnvelope`] and back. Values are
//! bincode-serialized, compressed with zstd once they exceed a
//! configurable threshold, and sealed with AES-256-GCM for caches marked
//! sensitive. The order is always compress-then-encrypt: ciphertext is
//! near-random and does not compress, so compression gates on the
//! pre-encryption payload size.

pub mod codec;
pub mod keys;

#[doc(inline)]
pub use codec::EntryCodec;
#[doc(inline)]
pub use keys::MasterKey;
