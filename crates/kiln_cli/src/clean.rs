//! `kiln clean`, removal of the on-disk cache.

use anyhow::Context;

use crate::project::Project;
use crate::GlobalArgs;

/// Runs the `kiln clean` command.
pub fn run(global: &GlobalArgs) -> anyhow::Result<i32> {
    let project = Project::load(global)?;
    let dir = project.cache_dir();
    if dir.is_dir() {
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("cannot remove {}", dir.display()))?;
        if !global.quiet {
            eprintln!("    Removed {}", dir.display());
        }
    } else if !global.quiet {
        eprintln!("    Nothing to clean");
    }
    Ok(0)
}
