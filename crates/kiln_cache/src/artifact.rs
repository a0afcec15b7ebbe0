//! On-disk persistent tier.
//!
//! Each value is stored as its own file under the cache directory, addressed
//! by the hash of its key. Every file starts with a header containing magic
//! bytes, format version, the original key and a checksum of the payload, and
//! reads validate all four. Corrupt or foreign files read as misses.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::persistent::PersistentStore;

/// Magic bytes identifying a Kiln cache file.
const ARTIFACT_MAGIC: [u8; 4] = *b"KILN";

/// Current file format version. Increment on breaking changes to the header
/// or payload format.
const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// File extension for cache files.
const ARTIFACT_EXT: &str = "kc";

/// Header prepended to every cache file for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],

    /// File format version.
    pub format_version: u32,

    /// Kiln version that wrote the file.
    pub kiln_version: String,

    /// The full key the value was stored under.
    pub key: Vec<u8>,

    /// Content hash of the payload.
    pub checksum: ContentHash,
}

/// Persistent tier storing one validated file per key.
pub struct FsStore {
    cache_dir: PathBuf,
    kiln_version: String,
    tmp_counter: AtomicU64,
}

impl FsStore {
    /// Creates a store rooted at `cache_dir`. Directories are created lazily.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            kiln_version: env!("CARGO_PKG_VERSION").to_string(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// Root directory of the store.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the file path for `key`: `<dir>/<2 hex>/<32 hex>.kc`.
    pub fn artifact_path(&self, key: &[u8]) -> PathBuf {
        let name = ContentHash::from_bytes(key).to_string();
        self.cache_dir
            .join(&name[..2])
            .join(format!("{name}.{ARTIFACT_EXT}"))
    }

    fn encode(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CacheError> {
        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            kiln_version: self.kiln_version.clone(),
            key: key.to_vec(),
            checksum: ContentHash::from_bytes(data),
        };

        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        // 4-byte header length (little-endian) + header + payload
        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(data);
        Ok(output)
    }

    /// Splits a raw file into header and payload without validating them.
    fn split(raw: &[u8]) -> Option<(ArtifactHeader, &[u8])> {
        if raw.len() < 4 {
            return None;
        }
        let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
        if raw.len() < 4 + header_len {
            return None;
        }
        let (header, _): (ArtifactHeader, usize) =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .ok()?;
        Some((header, &raw[4 + header_len..]))
    }

    /// Validates a raw file against the expected key and returns its payload.
    fn validate(path: &Path, key: &[u8], raw: &[u8]) -> Result<Vec<u8>, CacheError> {
        let (header, payload) = Self::split(raw).ok_or_else(|| CacheError::InvalidHeader {
            path: path.to_path_buf(),
            reason: "truncated or undecodable header".to_string(),
        })?;

        if header.magic != ARTIFACT_MAGIC {
            return Err(CacheError::InvalidHeader {
                path: path.to_path_buf(),
                reason: "missing magic bytes".to_string(),
            });
        }
        if header.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                path: path.to_path_buf(),
                expected: ARTIFACT_FORMAT_VERSION,
                actual: header.format_version,
            });
        }
        if header.key != key {
            return Err(CacheError::InvalidHeader {
                path: path.to_path_buf(),
                reason: "stored key does not match".to_string(),
            });
        }
        let actual = ContentHash::from_bytes(payload);
        if actual != header.checksum {
            return Err(CacheError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: header.checksum.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(payload.to_vec())
    }

    /// Removes every file whose stored key is not in `live_keys`, along with
    /// files that fail to parse. Returns the number of files removed.
    pub fn gc(&self, live_keys: &HashSet<Vec<u8>>) -> Result<usize, CacheError> {
        if !self.cache_dir.exists() {
            return Ok(0);
        }

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CacheError::Io { path, source }
        };

        let mut removed = 0;
        for shard in std::fs::read_dir(&self.cache_dir).map_err(io_err(&self.cache_dir))? {
            let shard = shard.map_err(io_err(&self.cache_dir))?.path();
            if !shard.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(&shard).map_err(io_err(&shard))? {
                let path = file.map_err(io_err(&shard))?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                    continue;
                }
                let raw = std::fs::read(&path).map_err(io_err(&path))?;
                let live = Self::split(&raw).is_some_and(|(header, _)| live_keys.contains(&header.key));
                if !live {
                    std::fs::remove_file(&path).map_err(io_err(&path))?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl PersistentStore for FsStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.artifact_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        match Self::validate(&path, key, &raw) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "discarding unreadable cache file");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        let path = self.artifact_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CacheError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let output = self.encode(key, value)?;
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{ARTIFACT_EXT}.tmp{}-{n}", std::process::id()));
        tokio::fs::write(&tmp, &output)
            .await
            .map_err(|source| CacheError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| CacheError::Io { path, source })
    }

    async fn remove(&self, key: &[u8]) -> Result<(), CacheError> {
        let path = self.artifact_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }
}
