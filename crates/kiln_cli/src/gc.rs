//! `kiln gc`, removal of superseded cache files.

use kiln_cache::FsStore;

use crate::project::Project;
use crate::GlobalArgs;

/// Runs the `kiln gc` command.
///
/// Keeps the manifest and every module's current artifact. Without a
/// manifest nothing is known to be live, so nothing is removed.
pub fn run(global: &GlobalArgs) -> anyhow::Result<i32> {
    let project = Project::load(global)?;
    let engine = project.engine(&[])?;
    if engine.generation() == 0 {
        if !global.quiet {
            eprintln!("    No build manifest, nothing to collect");
        }
        return Ok(0);
    }

    let live = engine.live_storage_keys();
    drop(engine);
    let removed = FsStore::new(&project.cache_dir()).gc(&live)?;
    if !global.quiet {
        eprintln!("    Removed {removed} file(s), kept {}", live.len());
    }
    Ok(0)
}
