//! Shared helpers for CLI commands: project root resolution, configuration
//! loading, source discovery and engine construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use kiln_common::ModuleId;
use kiln_config::{load_config, load_config_from_str, EngineConfig, CONFIG_FILE};
use kiln_engine::{Engine, FsSource};

use crate::transform::LineTransform;
use crate::GlobalArgs;

/// Cache location used when `kiln.toml` does not name one.
const DEFAULT_CACHE_DIR: &str = ".kiln/cache";

/// A resolved project: its root directory and configuration.
pub struct Project {
    /// Directory containing `kiln.toml` (or the working directory).
    pub root: PathBuf,
    /// Loaded configuration, with the cache directory made absolute.
    pub config: EngineConfig,
}

impl Project {
    /// Resolves the project from global CLI args.
    ///
    /// If `--config` is specified, that file is loaded and its directory is
    /// the root. Otherwise the nearest ancestor containing `kiln.toml` is
    /// used, falling back to the current directory with default settings.
    pub fn load(global: &GlobalArgs) -> anyhow::Result<Self> {
        let (root, mut config) = match global.config {
            Some(ref path) => {
                let path = PathBuf::from(path);
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                let config = load_config_from_str(&content)
                    .with_context(|| format!("invalid configuration in {}", path.display()))?;
                let root = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                (root, config)
            }
            None => {
                let cwd = std::env::current_dir()?;
                let root = find_project_root(&cwd).unwrap_or(cwd);
                let config = load_config(&root)
                    .with_context(|| format!("invalid configuration in {}", root.display()))?;
                (root, config)
            }
        };

        let dir = config
            .cache
            .dir
            .take()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
        config.cache.dir = Some(if dir.is_absolute() { dir } else { root.join(dir) });
        Ok(Self { root, config })
    }

    /// The on-disk cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.config
            .cache
            .dir
            .clone()
            .unwrap_or_else(|| self.root.join(DEFAULT_CACHE_DIR))
    }

    /// The source directory.
    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    /// Every file under `src/`, as module ids relative to the root.
    pub fn sources(&self) -> anyhow::Result<Vec<ModuleId>> {
        let src = self.src_dir();
        let mut files = Vec::new();
        if src.is_dir() {
            walk_dir(&src, &mut files)?;
        }
        files.sort();
        Ok(files
            .iter()
            .filter_map(|path| path.strip_prefix(&self.root).ok())
            .map(ModuleId::from_path)
            .collect())
    }

    /// Opens an engine over the project, loading any persisted state.
    pub fn engine(&self, entries: &[String]) -> anyhow::Result<Engine> {
        let mut builder = Engine::builder(
            self.config.clone(),
            Arc::new(LineTransform),
            Arc::new(FsSource::new(&self.root)),
        );
        for entry in entries {
            builder = builder.entry_point(entry);
        }
        builder.build().context("cannot start the build engine")
    }
}

/// Walks up from `start` looking for the nearest directory containing
/// `kiln.toml`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("cannot list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(config: Option<String>) -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
            config,
        }
    }

    #[test]
    fn finds_root_from_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "").unwrap();
        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested).unwrap(), dir.path());
    }

    #[test]
    fn explicit_config_sets_root_and_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE);
        std::fs::write(&config_path, "[cache]\ndir = \"out/cache\"\n").unwrap();

        let project =
            Project::load(&global(Some(config_path.to_string_lossy().into_owned()))).unwrap();
        assert_eq!(project.root, dir.path());
        assert_eq!(project.cache_dir(), dir.path().join("out/cache"));
    }

    #[test]
    fn default_cache_dir_lives_under_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE);
        std::fs::write(&config_path, "").unwrap();

        let project =
            Project::load(&global(Some(config_path.to_string_lossy().into_owned()))).unwrap();
        assert_eq!(project.cache_dir(), dir.path().join(".kiln/cache"));
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE);
        std::fs::write(&config_path, "[scheduler]\nparallelism = 0\n").unwrap();
        assert!(Project::load(&global(Some(config_path.to_string_lossy().into_owned()))).is_err());
    }

    #[test]
    fn sources_are_relative_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        std::fs::write(dir.path().join("src/main.js"), "main").unwrap();
        std::fs::write(dir.path().join("src/lib/util.js"), "util").unwrap();
        let project = Project {
            root: dir.path().to_path_buf(),
            config: EngineConfig::default(),
        };
        let sources = project.sources().unwrap();
        assert_eq!(
            sources,
            vec![ModuleId::from("src/lib/util.js"), ModuleId::from("src/main.js")]
        );
    }
}
