//! Which artifact keys each module has produced.

use std::collections::{BTreeMap, BTreeSet};

use kiln_common::{ArtifactKey, ModuleId};
use serde::{Deserialize, Serialize};

/// Maps each module to every artifact key it has been stored under.
///
/// Lets a module's entries be invalidated without scanning the whole cache,
/// and tells garbage collection which persistent keys are still reachable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleKeyIndex {
    keys: BTreeMap<ModuleId, BTreeSet<ArtifactKey>>,
}

impl ModuleKeyIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `module` produced `key`. Returns `false` if already known.
    pub fn record(&mut self, module: &ModuleId, key: ArtifactKey) -> bool {
        self.keys.entry(module.clone()).or_default().insert(key)
    }

    /// Removes and returns all keys recorded for `module`.
    pub fn take(&mut self, module: &ModuleId) -> BTreeSet<ArtifactKey> {
        self.keys.remove(module).unwrap_or_default()
    }

    /// Forgets a single key wherever it is recorded.
    pub fn forget(&mut self, key: &ArtifactKey) {
        self.keys.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// Keys recorded for `module`.
    pub fn keys_of(&self, module: &ModuleId) -> impl Iterator<Item = &ArtifactKey> {
        self.keys.get(module).into_iter().flatten()
    }

    /// Modules with at least one recorded key.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleId> {
        self.keys.keys()
    }

    /// Every recorded key.
    pub fn all_keys(&self) -> impl Iterator<Item = &ArtifactKey> {
        self.keys.values().flatten()
    }

    /// Number of modules with recorded keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
