//! Where module sources come from.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use kiln_common::ModuleId;
use parking_lot::RwLock;

/// Reads module sources.
///
/// Called from blocking worker threads as well as the orchestrator.
pub trait SourceProvider: Send + Sync {
    /// Reads the bytes at `path`.
    ///
    /// A missing source returns an error of kind [`io::ErrorKind::NotFound`].
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Reads sources from the file system, relative to a project root.
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    /// Creates a provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceProvider for FsSource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(self.root.join(path))
    }
}

/// Sources held in memory, keyed by module id.
///
/// Editable while an engine is using it.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<HashMap<ModuleId, Vec<u8>>>,
}

impl MemorySource {
    /// Creates an empty source set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a file.
    pub fn write(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files.write().insert(ModuleId::from(path), contents.into());
    }

    /// Deletes a file.
    pub fn delete(&self, path: &str) {
        self.files.write().remove(&ModuleId::from(path));
    }
}

impl SourceProvider for MemorySource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .get(&ModuleId::from_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}
