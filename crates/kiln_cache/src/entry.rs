//! Cached artifacts and their bookkeeping.

use std::time::{SystemTime, UNIX_EPOCH};

use kiln_common::{ArtifactKey, ContentHash};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The transformed output of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Output bytes.
    pub output: Vec<u8>,
    /// Fingerprint of `output`.
    pub output_hash: ContentHash,
    /// Dependency specifiers discovered while transforming, in import order.
    pub dependencies: Vec<String>,
}

impl Artifact {
    /// Creates an artifact, fingerprinting the output.
    pub fn new(output: Vec<u8>, dependencies: Vec<String>) -> Self {
        let output_hash = ContentHash::from_bytes(&output);
        Self {
            output,
            output_hash,
            dependencies,
        }
    }

    /// Approximate memory footprint, used for the byte budget.
    pub fn size(&self) -> u64 {
        let deps: usize = self.dependencies.iter().map(String::len).sum();
        (self.output.len() + deps) as u64
    }
}

/// A cache entry: an artifact stored under its composite key.
///
/// Entries are never mutated in place except for the access timestamp; a
/// module whose key changes produces a new entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The composite key the artifact was produced under.
    pub key: ArtifactKey,
    /// The stored artifact.
    pub artifact: Artifact,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
    /// Last access time, unix milliseconds.
    pub last_accessed_at: u64,
}

impl CacheEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(key: ArtifactKey, artifact: Artifact) -> Self {
        let now = now_millis();
        Self {
            key,
            artifact,
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// Encodes the entry for the persistent tier.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })
    }

    /// Decodes an entry read from the persistent tier.
    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(entry, _)| entry)
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
