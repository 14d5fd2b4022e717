// Copyright (c) The Strata Project Authors.
// Licensed under the MIT License.

//! Byte-oriented persistence seam for durable tiers.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

use strata_tier::Result;

/// Storage seam for durable tiers.
///
/// Implementations store opaque byte records; all envelope semantics live
/// in the tier above. The wire protocol of any concrete medium is out of
/// scope for the engine.
#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Reads a record, `None` if absent.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes (or overwrites) a record.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Removes a record. Returns `true` if it existed.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Lists every stored key.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Removes all records.
    async fn clear(&self) -> Result<()>;
}

/// An in-process backend: durable only for the lifetime of the process.
///
/// Useful in tests and as a stand-in when no persistent medium is
/// configured.
#[derive(Default)]
pub struct MemoryBackend {
    records: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.records.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.records.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.records.iter().map(|r| r.key().clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.records.clear();
        Ok(())
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("records", &self.records.len())
            .finish()
    }
}

/// On-disk record: the full key travels with the payload so the index can
/// be rebuilt from a directory scan.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
}

/// A file-per-record backend under a root directory.
///
/// File names are the xxh3-128 of the key; the record inside carries the
/// full key for index rebuilds and collision detection. A hash collision
/// surfaces as a miss, which is always safe for a cache.
pub struct FileBackend {
    root: PathBuf,
    index: DashMap<String, PathBuf>,
}

impl FileBackend {
    /// Opens (creating if needed) a backend rooted at `root` and rebuilds
    /// the key index from the records already on disk.
    ///
    /// # Errors
    ///
    /// I/O failures reading the directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let index = DashMap::new();
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(dirent) = dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().is_none_or(|ext| ext != "rec") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match bincode::deserialize::<StoredRecord>(&bytes) {
                Ok(record) => {
                    index.insert(record.key, path);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "strata",
                        path = %path.display(),
                        error = %e,
                        "skipping undecodable record file"
                    );
                }
            }
        }

        Ok(Self { root, index })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{:032x}.rec", xxh3_128(key.as_bytes())))
    }
}

#[async_trait]
impl DurableBackend for FileBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.index.get(key).map(|p| p.value().clone()) else {
            return Ok(None);
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: StoredRecord = match bincode::deserialize(&bytes) {
            Ok(record) => record,
            Err(_) => return Ok(None),
        };
        if record.key != key {
            // Hash collision with another key's record.
            return Ok(None);
        }
        Ok(Some(record.payload))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let record = StoredRecord {
            key: key.to_string(),
            payload: bytes.to_vec(),
        };
        let encoded = bincode::serialize(&record)
            .map_err(|e| strata_tier::CacheError::Backend(format!("encode record: {e}")))?;
        tokio::fs::write(&path, encoded).await?;
        self.index.insert(key.to_string(), path);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let Some((_, path)) = self.index.remove(key) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.index.iter().map(|r| r.key().clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        let paths: Vec<PathBuf> = self.index.iter().map(|r| r.value().clone()).collect();
        self.index.clear();
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBackend")
            .field("root", &self.root)
            .field("records", &self.index.len())
            .finish()
    }
}
