//! `kiln build`, an incremental rebuild of the project.
//!
//! 1. Resolve the project and open the engine (loading the manifest)
//! 2. Work out the changed paths: the ones given on the command line, or
//!    every file under `src/` whose hash differs from the last build
//! 3. Run one generation and print its report
//! 4. Optionally write every module's output under `--out`

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use kiln_cache::{ChangeSet, SourceHasher};
use kiln_common::ModuleId;
use kiln_engine::{BuildReport, BuildWarning, Engine};
use tracing::debug;

use crate::project::Project;
use crate::{BuildArgs, GlobalArgs};

/// Runs the `kiln build` command.
///
/// Returns exit code 0 if every module built, 1 if any failed.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> anyhow::Result<i32> {
    let project = Project::load(global)?;
    let mut engine = project.engine(&args.entries)?;

    let changed: Vec<ModuleId> = if args.paths.is_empty() {
        detect_changes(&project, &engine)?.changed()
    } else {
        args.paths.iter().map(|p| ModuleId::from(p.as_str())).collect()
    };
    debug!(changed = changed.len(), "collected changed paths");

    let paths: Vec<_> = changed.iter().map(ModuleId::as_path).collect();
    let report = engine.build(&paths)?;
    print_report(&report, global);

    if let Some(ref out) = args.out {
        let written = write_outputs(&mut engine, Path::new(out))?;
        if !global.quiet {
            eprintln!("    Wrote {written} file(s) to {out}");
        }
    }

    Ok(if report.is_success() { 0 } else { 1 })
}

/// Compares the hashes of `src/` against what the engine last saw.
pub fn detect_changes(project: &Project, engine: &Engine) -> anyhow::Result<ChangeSet> {
    let sources = project.sources()?;
    let current = SourceHasher::hash_modules(&project.root, &sources);
    // only files under src/ are tracked; discovered imports elsewhere are not
    let src = project.src_dir();
    let known: BTreeMap<_, _> = engine
        .known_hashes()
        .into_iter()
        .filter(|(id, _)| project.root.join(id.as_path()).starts_with(&src))
        .collect();
    Ok(SourceHasher::detect_changes(&current, &known))
}

fn print_report(report: &BuildReport, global: &GlobalArgs) {
    for (id, error) in &report.errors {
        eprintln!("error[{id}]: {error}");
    }
    for warning in &report.warnings {
        match warning {
            BuildWarning::CacheIo { message } => eprintln!("warning: cache: {message}"),
            BuildWarning::CyclicBuildNonConvergence {
                members,
                iterations,
            } => eprintln!(
                "warning: import cycle of {} module(s) did not settle after {iterations} iteration(s)",
                members.len()
            ),
            BuildWarning::DependencyChurn { module, attempts } => eprintln!(
                "warning[{module}]: imports kept changing after {attempts} attempt(s)"
            ),
        }
    }
    if global.quiet {
        return;
    }
    for id in &report.stale_modules {
        eprintln!("   Stale {id}");
    }
    eprintln!(
        "   Result: {} updated, {} error(s), {} stale, {} removed in {:.2?} ({} transform(s), {} restored)",
        report.updated_modules.len(),
        report.errors.len(),
        report.stale_modules.len(),
        report.removed_modules.len(),
        report.duration,
        report.stats.transforms,
        report.stats.restored,
    );
}

/// Writes the current artifact of every module to `out/<module id>`.
fn write_outputs(engine: &mut Engine, out: &Path) -> anyhow::Result<usize> {
    let ids: Vec<ModuleId> = engine.graph().ids().into_iter().collect();
    let mut written = 0;
    for id in ids {
        let Some(artifact) = engine.artifact(&id) else {
            continue;
        };
        let path = out.join(id.as_path());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        std::fs::write(&path, &artifact.output)
            .with_context(|| format!("cannot write {}", path.display()))?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::CONFIG_FILE;

    fn setup() -> (tempfile::TempDir, GlobalArgs) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[scheduler]\nparallelism = 2\n").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.js"), "export   a").unwrap();
        std::fs::write(
            dir.path().join("src/b.js"),
            "import \"./a.js\"\nexport b",
        )
        .unwrap();
        let global = GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(dir.path().join(CONFIG_FILE).to_string_lossy().into_owned()),
        };
        (dir, global)
    }

    fn args(out: Option<&Path>) -> BuildArgs {
        BuildArgs {
            paths: vec![],
            entries: vec![],
            out: out.map(|p| p.to_string_lossy().into_owned()),
        }
    }

    #[test]
    fn builds_and_writes_outputs() {
        let (dir, global) = setup();
        let out = dir.path().join("dist");
        assert_eq!(run(&args(Some(&out)), &global).unwrap(), 0);
        assert_eq!(std::fs::read(out.join("src/a.js")).unwrap(), b"export a");
        assert_eq!(
            std::fs::read(out.join("src/b.js")).unwrap(),
            b"import \"./a.js\"\nexport b"
        );
        assert!(dir.path().join(".kiln/cache").is_dir());
    }

    #[test]
    fn second_build_detects_no_changes() {
        let (_dir, global) = setup();
        assert_eq!(run(&args(None), &global).unwrap(), 0);

        let project = Project::load(&global).unwrap();
        let engine = project.engine(&[]).unwrap();
        assert!(detect_changes(&project, &engine).unwrap().is_empty());
    }

    #[test]
    fn edits_are_detected() {
        let (dir, global) = setup();
        run(&args(None), &global).unwrap();
        std::fs::write(dir.path().join("src/a.js"), "export a2").unwrap();
        std::fs::write(dir.path().join("src/c.js"), "export c").unwrap();

        let project = Project::load(&global).unwrap();
        let engine = project.engine(&[]).unwrap();
        let changes = detect_changes(&project, &engine).unwrap();
        assert_eq!(changes.modified, vec![ModuleId::from("src/a.js")]);
        assert_eq!(changes.added, vec![ModuleId::from("src/c.js")]);
    }

    #[test]
    fn failed_modules_give_exit_code_one() {
        let (dir, global) = setup();
        std::fs::write(dir.path().join("src/a.js"), "import \"./broken").unwrap();
        assert_eq!(run(&args(None), &global).unwrap(), 1);
    }
}
