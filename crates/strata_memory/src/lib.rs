// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Volatile in-process tier for the strata multi-tier cache.
//!
//! [`VolatileTier`] keeps typed entries in sharded process memory,
//! bounded by entry count and estimated byte size, evicting in
//! priority+recency batches when a ceiling is breached.

pub mod tier;

#[doc(inline)]
pub use tier::VolatileTier;
