//! Stable module identifiers derived from source paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Identifier of a module in the build graph.
///
/// Derived from the lexically normalised source path: separators become `/`,
/// `.` segments are dropped and `..` segments pop their parent. Two spellings
/// of the same path produce the same id, and the id is stable across process
/// runs so it can key persisted state.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    /// Creates an id from a source path.
    pub fn from_path(path: &Path) -> Self {
        let mut absolute = false;
        let mut segments: Vec<String> = Vec::new();
        for component in path.components() {
            match component {
                Component::Prefix(prefix) => {
                    segments.push(prefix.as_os_str().to_string_lossy().into_owned());
                }
                Component::RootDir => absolute = true,
                Component::CurDir => {}
                Component::ParentDir => {
                    if matches!(segments.last(), Some(last) if last != "..") {
                        segments.pop();
                    } else if !absolute {
                        segments.push("..".to_string());
                    }
                }
                Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            }
        }
        let joined = segments.join("/");
        if absolute {
            Self(format!("/{joined}"))
        } else {
            Self(joined)
        }
    }

    /// Resolves an import specifier relative to this module.
    ///
    /// Specifiers starting with `./` or `../` are joined onto this module's
    /// directory; anything else is taken as a path from the project root.
    pub fn resolve(&self, specifier: &str) -> Self {
        if specifier.starts_with("./") || specifier.starts_with("../") {
            let base = self.as_path();
            let dir = base.parent().unwrap_or_else(|| Path::new(""));
            Self::from_path(&dir.join(specifier))
        } else {
            Self::from_path(Path::new(specifier))
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the normalised path this id was derived from.
    pub fn as_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(path: &str) -> Self {
        Self::from_path(Path::new(path))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}
