//! Composite artifact keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::ContentHash;
use crate::module_id::ModuleId;

/// The cache key of a transformed module.
///
/// Combines the fingerprint of the module id, the fingerprint of the raw
/// source, the fingerprint of the transform configuration, and an
/// order-sensitive fingerprint over the module's dependencies. A change
/// anywhere below a module therefore changes its key, and two modules with
/// identical sources never share one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Fingerprint of the module id.
    pub module: ContentHash,
    /// Fingerprint of the source bytes.
    pub content: ContentHash,
    /// Fingerprint of the transform configuration.
    pub config: ContentHash,
    /// Combined fingerprint of the dependencies, in import order.
    pub dependencies: ContentHash,
}

impl ArtifactKey {
    /// Builds a key for `module` from its content and config hashes and the
    /// ordered dependency fingerprints.
    pub fn new(
        module: &ModuleId,
        content: ContentHash,
        config: ContentHash,
        dependencies: &[ContentHash],
    ) -> Self {
        Self {
            module: ContentHash::from_bytes(module.as_str().as_bytes()),
            content,
            config,
            dependencies: ContentHash::combine(dependencies),
        }
    }

    /// Collapses the key into a single digest, used to address storage.
    pub fn digest(&self) -> ContentHash {
        ContentHash::combine(&[self.module, self.content, self.config, self.dependencies])
    }

    /// Serialized form used as the persistent-store key.
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + 32);
        key.extend_from_slice(b"art:");
        key.extend_from_slice(self.digest().to_string().as_bytes());
        key
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest())
    }
}

impl fmt::Debug for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ArtifactKey({:?}, {:?}, {:?}, {:?})",
            self.module, self.content, self.config, self.dependencies
        )
    }
}
