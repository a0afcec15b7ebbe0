mod common;

use common::{engine, id, ids, source, LineTransform};
use kiln_engine::{BuildOutcome, ModuleErrorKind};
use kiln_graph::ModuleStatus;

fn chain() -> [(&'static str, &'static str); 3] {
    [
        ("a.js", "export a"),
        ("b.js", "import \"./a.js\"\nexport b"),
        ("c.js", "import \"./b.js\"\nexport c"),
    ]
}

#[test]
fn failed_module_keeps_its_last_good_artifact() {
    let transform = LineTransform::new();
    let src = source(&chain());
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js", "c.js"]).unwrap();

    src.write("a.js", "export a\n@fail");
    let report = engine.build(["a.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Failed);
    assert_eq!(report.errors.len(), 1);
    let error = &report.errors[&id("a.js")];
    assert_eq!(error.kind, ModuleErrorKind::TransformError);
    assert_eq!(error.location.map(|l| l.line), Some(2));

    assert_eq!(engine.status(&id("a.js")), Some(ModuleStatus::Errored));
    assert_eq!(&engine.artifact(&id("a.js")).unwrap().output[..], b"export a");
}

#[test]
fn dependents_of_a_failure_are_marked_stale() {
    let transform = LineTransform::new();
    let src = source(&chain());
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js", "c.js"]).unwrap();

    src.write("a.js", "@fail");
    let report = engine.build(["a.js"]).unwrap();
    assert_eq!(report.stale_modules, ids(&["b.js", "c.js"]));
    assert_eq!(engine.status(&id("b.js")), Some(ModuleStatus::Stale));
    assert_eq!(engine.status(&id("c.js")), Some(ModuleStatus::Stale));
    assert!(!report.errors.contains_key(&id("b.js")));
}

#[test]
fn fixing_a_failure_recovers() {
    let transform = LineTransform::new();
    let src = source(&chain());
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js", "c.js"]).unwrap();
    src.write("a.js", "@fail");
    engine.build(["a.js"]).unwrap();

    src.write("a.js", "export a");
    let report = engine.build(["a.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Done);
    assert!(report.errors.is_empty());
    assert!(report.stale_modules.is_empty());
    for module in ["a.js", "b.js", "c.js"] {
        assert_eq!(engine.status(&id(module)), Some(ModuleStatus::Ready), "{module}");
    }
}

#[test]
fn failure_without_a_good_artifact_fails_dependents() {
    let transform = LineTransform::new();
    let mut files = chain();
    files[0].1 = "@fail";
    let src = source(&files);
    let mut engine = engine(&transform, &src);

    let report = engine.build(["a.js", "b.js", "c.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Failed);
    assert_eq!(report.errors[&id("a.js")].kind, ModuleErrorKind::TransformError);
    assert_eq!(report.errors[&id("b.js")].kind, ModuleErrorKind::DependencyFailed);
    assert_eq!(report.errors[&id("c.js")].kind, ModuleErrorKind::DependencyFailed);
    assert!(engine.artifact(&id("a.js")).is_none());
}

#[test]
fn parse_failures_carry_a_location() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a\n\nimport \"./b.js")]);
    let mut engine = engine(&transform, &src);

    let report = engine.build(["a.js"]).unwrap();
    let error = &report.errors[&id("a.js")];
    assert_eq!(error.kind, ModuleErrorKind::ParseFailure);
    assert_eq!(error.location.map(|l| (l.line, l.column)), Some((3, 1)));
}

#[test]
fn missing_import_is_source_unavailable() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "import \"./missing.js\"\nexport a")]);
    let mut engine = engine(&transform, &src);

    let report = engine.build(["a.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Failed);
    assert_eq!(
        report.errors[&id("missing.js")].kind,
        ModuleErrorKind::SourceUnavailable
    );
    assert_eq!(
        report.errors[&id("a.js")].kind,
        ModuleErrorKind::DependencyFailed
    );
}

#[test]
fn deleting_a_leaf_removes_it() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a"), ("b.js", "export b")]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js"]).unwrap();

    src.delete("b.js");
    let report = engine.build(["b.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Done);
    assert_eq!(report.removed_modules, ids(&["b.js"]));
    assert!(!engine.graph().contains(&id("b.js")));
    assert!(engine.graph().contains(&id("a.js")));
}

#[test]
fn deleting_a_module_keeps_an_identical_sibling() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export same"), ("b.js", "export same")]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js"]).unwrap();
    assert_eq!(engine.handle().tracked_len(), 2);

    src.delete("a.js");
    let report = engine.build(["a.js"]).unwrap();
    assert_eq!(report.removed_modules, ids(&["a.js"]));
    assert_eq!(engine.handle().tracked_len(), 1);
    assert_eq!(&engine.artifact(&id("b.js")).unwrap().output[..], b"export same");

    transform.reset();
    engine.build(["b.js"]).unwrap();
    assert_eq!(transform.total(), 0);
    assert_eq!(&engine.artifact(&id("b.js")).unwrap().output[..], b"export same");
}

#[test]
fn deleting_a_dependency_fails_its_importers() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a"), ("b.js", "import \"./a.js\"\nexport b")]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js"]).unwrap();

    src.delete("a.js");
    let report = engine.build(["a.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Failed);
    assert!(report.removed_modules.contains(&id("a.js")));
    assert_eq!(
        report.errors[&id("b.js")].kind,
        ModuleErrorKind::DependencyFailed
    );
}

#[test]
fn unreadable_changed_path_is_reported() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a")]);
    let mut engine = engine(&transform, &src);

    let report = engine.build(["nowhere.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Failed);
    assert_eq!(
        report.errors[&id("nowhere.js")].kind,
        ModuleErrorKind::SourceUnavailable
    );
}
