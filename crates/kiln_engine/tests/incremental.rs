mod common;

use std::collections::BTreeMap;

use common::{builder, config, engine, id, ids, source, LineTransform};
use kiln_common::{ArtifactKey, ContentHash};
use kiln_engine::BuildOutcome;
use kiln_graph::ModuleStatus;

const NO_PATHS: [&str; 0] = [];

#[test]
fn cold_build_transforms_every_module() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a"), ("b.js", "import \"./a.js\"\nexport b")]);
    let mut engine = engine(&transform, &src);

    let report = engine.build(["a.js", "b.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Done);
    assert_eq!(report.updated_modules, ids(&["a.js", "b.js"]));
    assert!(report.errors.is_empty());
    assert_eq!(engine.graph().dependencies_of(&id("b.js")), &[id("a.js")]);
    assert_eq!(engine.status(&id("b.js")), Some(ModuleStatus::Ready));
    assert_eq!(&engine.artifact(&id("b.js")).unwrap().output[..], b"export b");
}

#[test]
fn rebuilding_without_changes_does_nothing() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a"), ("b.js", "import \"./a.js\"\nexport b")]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js"]).unwrap();
    transform.reset();

    let report = engine.build(NO_PATHS).unwrap();
    assert!(report.updated_modules.is_empty());
    assert_eq!(transform.total(), 0);

    // notifying unchanged files is also a no-op
    let report = engine.build(["a.js", "b.js"]).unwrap();
    assert!(report.updated_modules.is_empty());
    assert_eq!(transform.total(), 0);
}

#[test]
fn change_propagates_to_dependents() {
    let transform = LineTransform::new();
    let src = source(&[
        ("a.js", "export a"),
        ("b.js", "import \"./a.js\"\n@fingerprints\nexport b"),
        ("c.js", "import \"./b.js\"\n@fingerprints\nexport c"),
    ]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js", "c.js"]).unwrap();
    transform.reset();

    src.write("a.js", "export a2");
    let report = engine.build(["a.js"]).unwrap();
    assert_eq!(report.updated_modules, ids(&["a.js", "b.js", "c.js"]));
    assert_eq!(transform.calls("a.js"), 1);
    assert_eq!(transform.calls("b.js"), 1);
    assert_eq!(transform.calls("c.js"), 1);
}

#[test]
fn identical_output_stops_propagation() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a"), ("b.js", "import \"./a.js\"\nexport b")]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js"]).unwrap();
    let b_key = engine.graph().get(&id("b.js")).unwrap().artifact_key;
    transform.reset();

    // whitespace is normalized away, so a's output does not change
    src.write("a.js", "export    a\n\n");
    let report = engine.build(["a.js"]).unwrap();
    assert_eq!(report.updated_modules, ids(&["a.js"]));
    assert_eq!(transform.calls("a.js"), 1);
    assert_eq!(transform.calls("b.js"), 0);
    assert_eq!(engine.graph().get(&id("b.js")).unwrap().artifact_key, b_key);
}

#[test]
fn siblings_of_a_change_are_untouched() {
    let transform = LineTransform::new();
    let src = source(&[
        ("a.js", "export a"),
        ("b.js", "import \"./a.js\"\nexport b"),
        ("c.js", "import \"./a.js\"\nexport c"),
    ]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js", "c.js"]).unwrap();
    transform.reset();

    src.write("b.js", "import \"./a.js\"\nexport b2");
    let report = engine.build(["b.js"]).unwrap();
    assert_eq!(report.updated_modules, ids(&["b.js"]));
    assert_eq!(transform.calls("a.js"), 0);
    assert_eq!(transform.calls("c.js"), 0);
    assert_eq!(&engine.artifact(&id("b.js")).unwrap().output[..], b"export b2");
}

#[test]
fn shared_dependency_is_transformed_once_per_generation() {
    let transform = LineTransform::new();
    let src = source(&[
        ("d.js", "export d"),
        ("b.js", "import \"./d.js\"\n@fingerprints\nexport b"),
        ("c.js", "import \"./d.js\"\n@fingerprints\nexport c"),
        ("a.js", "import \"./b.js\"\nimport \"./c.js\"\nexport a"),
    ]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js", "c.js", "d.js"]).unwrap();
    transform.reset();

    src.write("d.js", "export d2");
    let report = engine.build(["d.js", "./d.js", "d.js"]).unwrap();
    assert_eq!(report.updated_modules, ids(&["a.js", "b.js", "c.js", "d.js"]));
    for module in ["a.js", "b.js", "c.js", "d.js"] {
        assert_eq!(transform.calls(module), 1, "{module}");
    }
}

#[test]
fn dependencies_are_discovered_transitively() {
    let transform = LineTransform::new();
    let src = source(&[
        ("main.js", "import \"./lib/util.js\"\nmain"),
        ("lib/util.js", "import \"../shared.js\"\nutil"),
        ("shared.js", "shared"),
    ]);
    let mut engine = engine(&transform, &src);

    let report = engine.build(["main.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Done);
    assert_eq!(report.updated_modules, ids(&["lib/util.js", "main.js", "shared.js"]));
    assert_eq!(
        engine.graph().dependencies_of(&id("lib/util.js")),
        &[id("shared.js")]
    );
    assert_eq!(engine.status(&id("shared.js")), Some(ModuleStatus::Ready));
    for module in ["main.js", "lib/util.js", "shared.js"] {
        assert_eq!(transform.calls(module), 1, "{module}");
    }
}

#[test]
fn discovered_imports_do_not_transform_twice() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a"), ("b.js", "import \"./a.js\"\nexport b")]);
    let mut engine = engine(&transform, &src);

    let report = engine.build(["a.js", "b.js"]).unwrap();
    assert_eq!(report.updated_modules, ids(&["a.js", "b.js"]));
    assert_eq!(report.stats.transforms, 2);
    assert_eq!(report.stats.reused, 1);
    assert_eq!(transform.calls("a.js"), 1);
    assert_eq!(transform.calls("b.js"), 1);

    let b = engine.graph().get(&id("b.js")).unwrap();
    let a = engine.graph().get(&id("a.js")).unwrap();
    let expected = ArtifactKey::new(
        &id("b.js"),
        b.content_hash.unwrap(),
        engine.config_hash(),
        &[a.output_hash.unwrap()],
    );
    assert_eq!(b.artifact_key, Some(expected));
    assert_eq!(&engine.artifact(&id("b.js")).unwrap().output[..], b"export b");

    transform.reset();
    src.write("c.js", "export c");
    src.write("b.js", "import \"./a.js\"\nimport \"./c.js\"\nexport b");
    let report = engine.build(["b.js"]).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Done);
    assert_eq!(report.updated_modules, ids(&["b.js", "c.js"]));
    assert_eq!(transform.calls("b.js"), 1);
    assert_eq!(transform.calls("c.js"), 1);
    assert_eq!(transform.calls("a.js"), 0);
}

#[test]
fn outputs_built_from_fingerprints_are_redone_once_imports_are_known() {
    let transform = LineTransform::new();
    let src = source(&[
        ("a.js", "export a"),
        ("b.js", "import \"./a.js\"\n@fingerprints"),
    ]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js"]).unwrap();

    assert_eq!(transform.calls("b.js"), 2);
    let a = engine.graph().get(&id("a.js")).unwrap().output_hash.unwrap();
    let expected = format!("fingerprints {a}");
    assert_eq!(engine.artifact(&id("b.js")).unwrap().output, expected.into_bytes());
}

#[test]
fn evicted_artifacts_are_rebuilt() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a"), ("b.js", "export b")]);
    let mut cfg = config();
    cfg.cache.max_entries = 1;
    let mut engine = builder(cfg, &transform, &src).build().unwrap();

    engine.build(["a.js"]).unwrap();
    engine.build(["b.js"]).unwrap();
    assert!(engine.cache_stats().evictions >= 1);
    transform.reset();

    let report = engine.build(["a.js"]).unwrap();
    assert_eq!(transform.calls("a.js"), 1);
    assert_eq!(report.stats.transforms, 1);
    assert_eq!(&engine.artifact(&id("a.js")).unwrap().output[..], b"export a");
}

#[test]
fn adding_an_import_rekeys_the_importer() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a"), ("b.js", "export b")]);
    let mut engine = engine(&transform, &src);
    engine.build(["a.js", "b.js"]).unwrap();

    src.write("b.js", "import \"./a.js\"\nexport b");
    engine.build(["b.js"]).unwrap();
    assert_eq!(engine.graph().dependencies_of(&id("b.js")), &[id("a.js")]);

    let b = engine.graph().get(&id("b.js")).unwrap();
    let a = engine.graph().get(&id("a.js")).unwrap();
    let expected = ArtifactKey::new(
        &id("b.js"),
        b.content_hash.unwrap(),
        engine.config_hash(),
        &[a.output_hash.unwrap()],
    );
    assert_eq!(b.artifact_key, Some(expected));
}

#[test]
fn artifact_keys_are_deterministic_across_engines() {
    let files = [
        ("a.js", "export a"),
        ("b.js", "import \"./a.js\"\nexport b"),
        ("c.js", "import \"./b.js\"\nimport \"./a.js\"\nexport c"),
    ];
    let mut keys = Vec::new();
    for _ in 0..2 {
        let transform = LineTransform::new();
        let mut engine = engine(&transform, &source(&files));
        engine.build(["a.js", "b.js", "c.js"]).unwrap();
        let snapshot: BTreeMap<_, _> = engine
            .graph()
            .nodes()
            .map(|n| (n.id.clone(), n.artifact_key.unwrap().storage_key()))
            .collect();
        keys.push(snapshot);
    }
    assert_eq!(keys[0], keys[1]);
}

#[test]
fn key_depends_on_dependency_order() {
    let a = ContentHash::from_bytes(b"a");
    let b = ContentHash::from_bytes(b"b");
    let content = ContentHash::from_bytes(b"source");
    let module = id("c.js");
    let ab = ArtifactKey::new(&module, content, ContentHash::EMPTY, &[a, b]);
    let ba = ArtifactKey::new(&module, content, ContentHash::EMPTY, &[b, a]);
    assert_ne!(ab, ba);
    assert_eq!(ab, ArtifactKey::new(&module, content, ContentHash::EMPTY, &[a, b]));
}

#[test]
fn generations_advance() {
    let transform = LineTransform::new();
    let src = source(&[("a.js", "export a")]);
    let mut engine = engine(&transform, &src);
    assert_eq!(engine.build(["a.js"]).unwrap().generation, 1);
    assert_eq!(engine.build(NO_PATHS).unwrap().generation, 2);
    assert_eq!(engine.generation(), 2);
}
