// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Per-installation encryption key material.

use std::fmt;

use strata_tier::{CacheError, Result};

/// Length of a master key in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// A per-installation symmetric key for sensitive caches.
///
/// The engine never derives key material from cache keys or values; the
/// embedder supplies the bytes (typically from an OS keystore or secret
/// manager) or generates an ephemeral key for tests and development.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Wraps caller-supplied key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh key from the operating system RNG.
    ///
    /// Data sealed with an ephemeral key is unreadable after restart;
    /// use caller-supplied bytes for durable sensitive caches.
    ///
    /// # Errors
    ///
    /// [`CacheError::EncryptionUnavailable`] if the OS RNG fails.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        getrandom::getrandom(&mut bytes).map_err(|_| CacheError::EncryptionUnavailable)?;
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

// Key material must never reach logs.
impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}
