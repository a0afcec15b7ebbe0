#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use kiln_cache::PersistentStore;
use kiln_common::ModuleId;
use kiln_config::EngineConfig;
use kiln_engine::{
    Engine, EngineBuilder, MemorySource, SourceLocation, Transform, TransformError,
    TransformInput, TransformOutput,
};
use parking_lot::Mutex;

/// A line-oriented transform that counts its invocations.
///
/// - `import "<spec>"` lines become dependencies and are dropped from output
/// - `@fail` fails the transform
/// - `@fingerprints` emits the dependency fingerprints it was given
/// - every other non-blank line is emitted with whitespace collapsed
#[derive(Default)]
pub struct LineTransform {
    calls: Mutex<HashMap<String, usize>>,
}

impl LineTransform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls
            .lock()
            .get(ModuleId::from(id).as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

impl Transform for LineTransform {
    fn transform(&self, input: &TransformInput) -> Result<TransformOutput, TransformError> {
        *self
            .calls
            .lock()
            .entry(input.id.as_str().to_string())
            .or_default() += 1;

        let text = String::from_utf8_lossy(&input.source);
        let mut lines = Vec::new();
        let mut dependencies = Vec::new();
        let mut reads_dependencies = false;
        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let location = SourceLocation::new(n as u32 + 1, 1);
            if let Some(rest) = line.strip_prefix("import ") {
                let rest = rest.trim();
                if rest.len() < 2 || !rest.starts_with('"') || !rest.ends_with('"') {
                    return Err(TransformError::parse("malformed import", location));
                }
                dependencies.push(rest[1..rest.len() - 1].to_string());
                continue;
            }
            match line {
                "@fail" => {
                    return Err(TransformError::transform("requested failure", Some(location)))
                }
                "@fingerprints" => {
                    reads_dependencies = true;
                    let fps: Vec<String> =
                        input.dependencies.iter().map(|(_, h)| h.to_string()).collect();
                    lines.push(format!("fingerprints {}", fps.join(",")));
                }
                _ => lines.push(line.split_whitespace().collect::<Vec<_>>().join(" ")),
            }
        }
        Ok(TransformOutput {
            output: lines.join("\n").into_bytes(),
            dependencies,
            reads_dependencies,
        })
    }
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.scheduler.parallelism = 4;
    config
}

pub fn builder(
    config: EngineConfig,
    transform: &Arc<LineTransform>,
    source: &Arc<MemorySource>,
) -> EngineBuilder {
    Engine::builder(config, transform.clone(), source.clone())
}

pub fn engine(transform: &Arc<LineTransform>, source: &Arc<MemorySource>) -> Engine {
    builder(config(), transform, source).build().unwrap()
}

pub fn engine_with_store(
    transform: &Arc<LineTransform>,
    source: &Arc<MemorySource>,
    store: Arc<dyn PersistentStore>,
) -> Engine {
    builder(config(), transform, source)
        .persistent_store(store)
        .build()
        .unwrap()
}

pub fn source(files: &[(&str, &str)]) -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new());
    for (path, contents) in files {
        source.write(path, *contents);
    }
    source
}

pub fn id(path: &str) -> ModuleId {
    ModuleId::from(path)
}

pub fn ids(paths: &[&str]) -> std::collections::BTreeSet<ModuleId> {
    paths.iter().map(|p| id(p)).collect()
}
