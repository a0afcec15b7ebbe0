//! Engine state persisted between runs.
//!
//! The manifest is stored as JSON in the persistent cache tier under a fixed
//! key. It records the dependency graph (with each module's last good
//! artifact key), the module→keys index and the config hash the graph was
//! built with. Loading is fail-safe: a missing, corrupt or incompatible
//! manifest means a cold start.

use kiln_cache::{CacheError, CacheStore, ModuleKeyIndex};
use kiln_common::ContentHash;
use kiln_graph::GraphSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Persistent-tier key of the manifest.
pub const MANIFEST_KEY: &[u8] = b"kiln:manifest";

/// Bumped on incompatible changes to the manifest layout.
const MANIFEST_VERSION: u32 = 2;

/// Persisted engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Layout version.
    pub version: u32,
    /// Kiln version that wrote the manifest.
    pub kiln_version: String,
    /// Config hash the graph was built with.
    pub config_hash: ContentHash,
    /// Generation counter at save time.
    pub generation: u64,
    /// The dependency graph.
    pub graph: GraphSnapshot,
    /// Keys produced by each module.
    pub index: ModuleKeyIndex,
}

impl Manifest {
    /// Creates a manifest for the current engine version.
    pub fn new(
        config_hash: ContentHash,
        generation: u64,
        graph: GraphSnapshot,
        index: ModuleKeyIndex,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            kiln_version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            generation,
            graph,
            index,
        }
    }

    /// Parses a manifest, rejecting other layout versions.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CacheError> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| CacheError::ManifestParse {
                reason: e.to_string(),
            })?;
        if manifest.version != MANIFEST_VERSION {
            return Err(CacheError::ManifestParse {
                reason: format!(
                    "manifest version {} is not supported (expected {MANIFEST_VERSION})",
                    manifest.version
                ),
            });
        }
        Ok(manifest)
    }

    /// Serializes the manifest.
    pub fn to_json(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Loads the manifest from the persistent tier, if there is a usable one.
    pub async fn load(cache: &mut CacheStore) -> Option<Self> {
        let bytes = cache.load_blob(MANIFEST_KEY).await?;
        match Self::from_json(&bytes) {
            Ok(manifest) => {
                info!(
                    modules = manifest.graph.nodes.len(),
                    generation = manifest.generation,
                    "loaded build manifest"
                );
                Some(manifest)
            }
            Err(e) => {
                debug!(error = %e, "ignoring unusable manifest");
                None
            }
        }
    }

    /// Saves the manifest to the persistent tier. Returns `true` once the
    /// tier acknowledges the write.
    pub async fn save(&self, cache: &mut CacheStore) -> bool {
        match self.to_json() {
            Ok(bytes) => cache.store_blob(MANIFEST_KEY, &bytes).await,
            Err(e) => {
                debug!(error = %e, "failed to serialize manifest");
                false
            }
        }
    }
}
