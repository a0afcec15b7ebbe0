//! Source hashing and change detection.
//!
//! Computes content hashes for module sources and compares them against the
//! hashes recorded by a previous build to find which modules are new,
//! modified, deleted, or unchanged.

use std::collections::BTreeMap;
use std::path::Path;

use kiln_common::{ContentHash, ModuleId};

use crate::error::CacheError;

/// Result of comparing current source hashes against recorded ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Modules with no recorded hash.
    pub added: Vec<ModuleId>,
    /// Modules whose hash differs from the recorded one.
    pub modified: Vec<ModuleId>,
    /// Modules recorded previously but absent now.
    pub deleted: Vec<ModuleId>,
    /// Modules whose hash matches.
    pub unchanged: Vec<ModuleId>,
}

impl ChangeSet {
    /// Returns `true` if nothing was added, modified, or deleted.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Number of modules that need reprocessing (added + modified).
    pub fn dirty_count(&self) -> usize {
        self.added.len() + self.modified.len()
    }

    /// Every module that changed in any way, in sorted order.
    pub fn changed(&self) -> Vec<ModuleId> {
        let mut all: Vec<ModuleId> = self
            .added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .cloned()
            .collect();
        all.sort();
        all
    }
}

/// Stateless helpers for hashing sources and diffing hash sets.
pub struct SourceHasher;

impl SourceHasher {
    /// Reads a file and returns its content hash.
    pub fn hash_file(path: &Path) -> Result<ContentHash, CacheError> {
        let content = std::fs::read(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(ContentHash::from_bytes(&content))
    }

    /// Hashes each module's source relative to `root`.
    ///
    /// Modules that cannot be read are left out, so they show up as deleted
    /// in a later [`detect_changes`](Self::detect_changes).
    pub fn hash_modules<'a>(
        root: &Path,
        modules: impl IntoIterator<Item = &'a ModuleId>,
    ) -> BTreeMap<ModuleId, ContentHash> {
        modules
            .into_iter()
            .filter_map(|id| {
                let hash = Self::hash_file(&root.join(id.as_path())).ok()?;
                Some((id.clone(), hash))
            })
            .collect()
    }

    /// Compares current hashes against recorded ones.
    pub fn detect_changes(
        current: &BTreeMap<ModuleId, ContentHash>,
        known: &BTreeMap<ModuleId, ContentHash>,
    ) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for (id, hash) in current {
            match known.get(id) {
                Some(prev) if prev == hash => changes.unchanged.push(id.clone()),
                Some(_) => changes.modified.push(id.clone()),
                None => changes.added.push(id.clone()),
            }
        }
        changes.deleted = known
            .keys()
            .filter(|id| !current.contains_key(*id))
            .cloned()
            .collect();
        changes
    }
}
