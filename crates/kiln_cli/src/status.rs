//! `kiln status`, a listing of sources changed since the last build.

use crate::build::detect_changes;
use crate::project::Project;
use crate::GlobalArgs;

/// Runs the `kiln status` command.
///
/// Prints added, modified and deleted sources. Returns exit code 0 when the
/// last build is up to date, 1 otherwise.
pub fn run(global: &GlobalArgs) -> anyhow::Result<i32> {
    let project = Project::load(global)?;
    let engine = project.engine(&[])?;
    let changes = detect_changes(&project, &engine)?;

    for id in &changes.added {
        println!("added     {id}");
    }
    for id in &changes.modified {
        println!("modified  {id}");
    }
    for id in &changes.deleted {
        println!("deleted   {id}");
    }
    if !global.quiet {
        if changes.is_empty() {
            eprintln!("   Up to date ({} module(s))", changes.unchanged.len());
        } else {
            eprintln!(
                "   {} change(s) since generation {}",
                changes.dirty_count(),
                engine.generation()
            );
        }
    }
    Ok(if changes.is_empty() { 0 } else { 1 })
}
