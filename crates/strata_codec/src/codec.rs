// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Envelope encoding and decoding.

use std::fmt;
use std::time::SystemTime;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use serde::{Serialize, de::DeserializeOwned};

use strata_tier::{
    CacheEntry, CacheError, EntryEnvelope, Priority, Result, SCHEMA_VERSION,
    entry::{ms_to_system_time, system_time_to_ms},
};

use crate::keys::MasterKey;

/// zstd level used for payload compression. Level 3 trades well between
/// ratio and encode cost for cache-sized payloads.
const COMPRESSION_LEVEL: i32 = 3;

/// AES-GCM nonce length in bytes; the nonce is prepended to ciphertext.
const NONCE_LEN: usize = 12;

/// Transforms typed entries into storable envelopes and back.
///
/// One codec is built per named cache from its profile and shared by all
/// durable tiers of that cache.
///
/// # Examples
///
/// ```
/// use strata_codec::EntryCodec;
/// use strata_tier::CacheEntry;
/// use std::time::Duration;
///
/// let codec = EntryCodec::plaintext(None);
/// let entry = CacheEntry::new(vec![1u8, 2, 3], Duration::from_secs(60));
/// let envelope = codec.encode(&entry).unwrap();
/// let back: CacheEntry<Vec<u8>> = codec.decode(&envelope).unwrap();
/// assert_eq!(back.value(), entry.value());
/// ```
pub struct EntryCodec {
    compress_above: Option<u64>,
    cipher: Option<Aes256Gcm>,
}

impl EntryCodec {
    /// Builds a codec. `compress_above` gates zstd on the serialized
    /// payload size; a key enables AES-256-GCM sealing of every payload.
    #[must_use]
    pub fn new(compress_above: Option<u64>, key: Option<&MasterKey>) -> Self {
        Self {
            compress_above,
            cipher: key.map(|k| Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(k.as_bytes()))),
        }
    }

    /// A codec without encryption.
    #[must_use]
    pub fn plaintext(compress_above: Option<u64>) -> Self {
        Self::new(compress_above, None)
    }

    /// Whether this codec seals payloads.
    #[must_use]
    pub fn encrypts(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encodes an entry into its persisted envelope.
    ///
    /// Compression applies only when the bincode output exceeds the
    /// configured threshold, and always before encryption.
    ///
    /// # Errors
    ///
    /// [`CacheError::Codec`] on serialization, compression or cipher
    /// failure.
    pub fn encode<V: Serialize>(&self, entry: &CacheEntry<V>) -> Result<EntryEnvelope> {
        let mut payload =
            bincode::serialize(entry.value()).map_err(|e| CacheError::Codec(format!("serialize: {e}")))?;

        let mut is_compressed = false;
        if let Some(threshold) = self.compress_above
            && payload.len() as u64 > threshold
        {
            payload = zstd::stream::encode_all(payload.as_slice(), COMPRESSION_LEVEL)
                .map_err(|e| CacheError::Codec(format!("compress: {e}")))?;
            is_compressed = true;
        }

        let mut is_encrypted = false;
        if let Some(cipher) = &self.cipher {
            payload = seal(cipher, &payload)?;
            is_encrypted = true;
        }

        Ok(EntryEnvelope {
            schema_version: SCHEMA_VERSION,
            priority: entry.priority().as_u8(),
            created_at_ms: system_time_to_ms(entry.created_at()),
            expires_at_ms: system_time_to_ms(entry.expires_at()),
            access_count: entry.access_count(),
            is_compressed,
            is_encrypted,
            payload,
        })
    }

    /// Decodes an envelope back into a typed entry.
    ///
    /// An unknown `schema_version`, a failed authentication tag, an
    /// unknown priority ordinal, or undecodable bytes all yield
    /// [`CacheError::CorruptEntry`] so the caller can treat the record as
    /// a miss and purge it. An encrypted envelope hitting a codec without
    /// a key yields [`CacheError::EncryptionUnavailable`].
    pub fn decode<V: DeserializeOwned>(&self, envelope: &EntryEnvelope) -> Result<CacheEntry<V>> {
        if envelope.schema_version != SCHEMA_VERSION {
            return Err(CacheError::corrupt(format!(
                "unknown schema version {}",
                envelope.schema_version
            )));
        }

        let priority = Priority::from_u8(envelope.priority)
            .ok_or_else(|| CacheError::corrupt(format!("unknown priority ordinal {}", envelope.priority)))?;

        let mut payload = envelope.payload.clone();
        if envelope.is_encrypted {
            let cipher = self.cipher.as_ref().ok_or(CacheError::EncryptionUnavailable)?;
            payload = open(cipher, &payload)?;
        }
        if envelope.is_compressed {
            payload = zstd::stream::decode_all(payload.as_slice())
                .map_err(|e| CacheError::corrupt(format!("decompress: {e}")))?;
        }

        let value: V = bincode::deserialize(&payload)
            .map_err(|e| CacheError::corrupt(format!("deserialize: {e}")))?;

        Ok(CacheEntry::from_raw_parts(
            value,
            ms_to_system_time(envelope.created_at_ms),
            ms_to_system_time(envelope.expires_at_ms),
            envelope.access_count,
            SystemTime::now(),
            priority,
            envelope.is_compressed,
            envelope.is_encrypted,
        ))
    }
}

impl fmt::Debug for EntryCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryCodec")
            .field("compress_above", &self.compress_above)
            .field("encrypts", &self.encrypts())
            .finish()
    }
}

/// Seals `plaintext` with a fresh random nonce; output is nonce followed
/// by ciphertext.
fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce_bytes).map_err(|e| CacheError::Codec(format!("nonce: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CacheError::Codec("encrypt failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverses [`seal`]. Tampered or truncated input is a corrupt entry.
fn open(cipher: &Aes256Gcm, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(CacheError::corrupt("sealed payload shorter than nonce"));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CacheError::corrupt("authentication failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Profile {
        id: u64,
        display_name: String,
        bio: String,
    }

    fn sample_profile(bio_len: usize) -> Profile {
        Profile {
            id: 7,
            display_name: "coach".into(),
            bio: "x".repeat(bio_len),
        }
    }

    fn entry(bio_len: usize) -> CacheEntry<Profile> {
        CacheEntry::with_priority(sample_profile(bio_len), Duration::from_secs(300), Priority::High)
    }

    #[test]
    fn round_trip_plain() {
        let codec = EntryCodec::plaintext(None);
        let original = entry(10);
        let envelope = codec.encode(&original).expect("encode");
        assert!(!envelope.is_compressed);
        assert!(!envelope.is_encrypted);

        let decoded: CacheEntry<Profile> = codec.decode(&envelope).expect("decode");
        assert_eq!(decoded.value(), original.value());
        assert_eq!(decoded.priority(), Priority::High);
    }

    #[test]
    fn compression_gates_on_threshold() {
        let codec = EntryCodec::plaintext(Some(1024));

        let small = codec.encode(&entry(10)).expect("encode");
        assert!(!small.is_compressed);

        let large = codec.encode(&entry(64 * 1024)).expect("encode");
        assert!(large.is_compressed);
        // A repetitive payload must actually shrink.
        assert!((large.payload.len() as u64) < 64 * 1024);

        let decoded: CacheEntry<Profile> = codec.decode(&large).expect("decode");
        assert_eq!(decoded.value().bio.len(), 64 * 1024);
    }

    #[test]
    fn round_trip_encrypted() {
        let key = MasterKey::generate().expect("rng");
        let codec = EntryCodec::new(None, Some(&key));

        let original = entry(100);
        let envelope = codec.encode(&original).expect("encode");
        assert!(envelope.is_encrypted);
        // Ciphertext must not contain the plaintext display name.
        let plain = bincode::serialize(original.value()).expect("serialize");
        assert_ne!(envelope.payload, plain);

        let decoded: CacheEntry<Profile> = codec.decode(&envelope).expect("decode");
        assert_eq!(decoded.value(), original.value());
    }

    #[test]
    fn round_trip_compressed_and_encrypted() {
        let key = MasterKey::generate().expect("rng");
        let codec = EntryCodec::new(Some(512), Some(&key));

        let original = entry(32 * 1024);
        let envelope = codec.encode(&original).expect("encode");
        assert!(envelope.is_compressed);
        assert!(envelope.is_encrypted);

        let decoded: CacheEntry<Profile> = codec.decode(&envelope).expect("decode");
        assert_eq!(decoded.value(), original.value());
    }

    #[test]
    fn compress_then_encrypt_keeps_payload_small() {
        // If the order were inverted the repetitive payload would not
        // shrink at all; the sealed size staying well under the raw size
        // pins the ordering.
        let key = MasterKey::generate().expect("rng");
        let codec = EntryCodec::new(Some(512), Some(&key));

        let envelope = codec.encode(&entry(64 * 1024)).expect("encode");
        assert!((envelope.payload.len() as u64) < 8 * 1024);
    }

    #[test]
    fn unknown_schema_version_is_corrupt() {
        let codec = EntryCodec::plaintext(None);
        let mut envelope = codec.encode(&entry(10)).expect("encode");
        envelope.schema_version = SCHEMA_VERSION + 1;

        let err = codec.decode::<Profile>(&envelope).expect_err("must reject");
        assert!(matches!(err, CacheError::CorruptEntry { .. }));
    }

    #[test]
    fn unknown_priority_ordinal_is_corrupt() {
        let codec = EntryCodec::plaintext(None);
        let mut envelope = codec.encode(&entry(10)).expect("encode");
        envelope.priority = 99;

        let err = codec.decode::<Profile>(&envelope).expect_err("must reject");
        assert!(matches!(err, CacheError::CorruptEntry { .. }));
    }

    #[test]
    fn tampered_ciphertext_is_corrupt() {
        let key = MasterKey::generate().expect("rng");
        let codec = EntryCodec::new(None, Some(&key));
        let mut envelope = codec.encode(&entry(100)).expect("encode");

        let last = envelope.payload.len() - 1;
        envelope.payload[last] ^= 0xFF;

        let err = codec.decode::<Profile>(&envelope).expect_err("must reject");
        assert!(matches!(err, CacheError::CorruptEntry { .. }));
    }

    #[test]
    fn wrong_key_cannot_open() {
        let codec_a = EntryCodec::new(None, Some(&MasterKey::generate().expect("rng")));
        let codec_b = EntryCodec::new(None, Some(&MasterKey::generate().expect("rng")));

        let envelope = codec_a.encode(&entry(100)).expect("encode");
        let err = codec_b.decode::<Profile>(&envelope).expect_err("must reject");
        assert!(matches!(err, CacheError::CorruptEntry { .. }));
    }

    #[test]
    fn encrypted_envelope_without_key_is_unavailable() {
        let key = MasterKey::generate().expect("rng");
        let sealing = EntryCodec::new(None, Some(&key));
        let plain = EntryCodec::plaintext(None);

        let envelope = sealing.encode(&entry(100)).expect("encode");
        let err = plain.decode::<Profile>(&envelope).expect_err("must reject");
        assert!(matches!(err, CacheError::EncryptionUnavailable));
    }

    #[test]
    fn metadata_survives_the_round_trip() {
        let codec = EntryCodec::plaintext(None);
        let original = entry(10);
        let envelope = codec.encode(&original).expect("encode");
        let decoded: CacheEntry<Profile> = codec.decode(&envelope).expect("decode");

        let created_delta = decoded
            .created_at()
            .duration_since(original.created_at())
            .unwrap_or_else(|e| e.duration());
        assert!(created_delta < Duration::from_millis(2));
        assert_eq!(decoded.access_count(), original.access_count());
    }
}
