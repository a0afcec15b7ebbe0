//! Graph nodes.

use std::path::PathBuf;

use kiln_common::{ArtifactKey, ContentHash, ModuleId};
use serde::{Deserialize, Serialize};

/// Build status of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleStatus {
    /// Discovered as a dependency but not read or transformed yet.
    Pending,
    /// The artifact is current.
    Ready,
    /// The last transform failed. The last good artifact, if any, is kept.
    Errored,
    /// Built against the last good artifact of a failed dependency.
    Stale,
}

/// A module in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleNode {
    /// Stable identifier.
    pub id: ModuleId,

    /// Source location.
    pub path: PathBuf,

    /// Fingerprint of the source bytes at last read. `None` for placeholders.
    pub content_hash: Option<ContentHash>,

    /// Fingerprint of the transform configuration applied.
    pub config_hash: Option<ContentHash>,

    /// Imported modules, in first-seen order, without duplicates.
    pub dependency_ids: Vec<ModuleId>,

    /// Key of the last good artifact.
    pub artifact_key: Option<ArtifactKey>,

    /// Fingerprint of the last good output bytes.
    pub output_hash: Option<ContentHash>,

    /// Current build status.
    pub status: ModuleStatus,
}

impl ModuleNode {
    /// Creates a placeholder for a module that is referenced but not read yet.
    pub fn placeholder(id: ModuleId) -> Self {
        let path = id.as_path();
        Self {
            id,
            path,
            content_hash: None,
            config_hash: None,
            dependency_ids: Vec::new(),
            artifact_key: None,
            output_hash: None,
            status: ModuleStatus::Pending,
        }
    }

    /// Returns `true` if the node has not been read yet.
    pub fn is_placeholder(&self) -> bool {
        self.content_hash.is_none()
    }

    /// Returns `true` if a good artifact exists for this node.
    pub fn has_artifact(&self) -> bool {
        self.artifact_key.is_some() && self.output_hash.is_some()
    }
}

/// Removes duplicates while keeping first-seen order.
pub fn dedup_ordered(ids: impl IntoIterator<Item = ModuleId>) -> Vec<ModuleId> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
