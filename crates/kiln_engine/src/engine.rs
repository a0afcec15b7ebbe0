//! The incremental build orchestrator.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use kiln_cache::{Artifact, CacheStats, CacheStore, FsStore, MemoryBudget, PersistentStore};
use kiln_common::{ContentHash, InternalError, ModuleId};
use kiln_config::{validate_config, EngineConfig};
use kiln_graph::{DependencyGraph, ModuleStatus};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::manifest::{Manifest, MANIFEST_KEY};
use crate::pending::{EngineHandle, EngineState};
use crate::plugin::{Plugin, PluginRegistry};
use crate::report::{BuildOutcome, BuildReport, BuildWarning, ModuleError};
use crate::scheduler::Scheduler;
use crate::source::SourceProvider;
use crate::transform::Transform;
use crate::worker::WorkerPool;

/// Configures and constructs an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    transform: Arc<dyn Transform>,
    source: Arc<dyn SourceProvider>,
    store: Option<Arc<dyn PersistentStore>>,
    plugins: PluginRegistry,
    entry_points: Vec<ModuleId>,
}

impl EngineBuilder {
    /// Uses `store` as the persistent cache tier instead of the directory
    /// named by `cache.dir`.
    pub fn persistent_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registers a plugin. Plugins run in registration order.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Registers a build entry point.
    ///
    /// Once any entry point is registered, modules that cannot be reached
    /// from one are pruned at the end of every generation.
    pub fn entry_point(mut self, path: impl AsRef<Path>) -> Self {
        self.entry_points.push(ModuleId::from_path(path.as_ref()));
        self
    }

    /// Validates the configuration, starts the runtime and loads any
    /// persisted manifest.
    pub fn build(self) -> Result<Engine, EngineError> {
        validate_config(&self.config)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.scheduler.parallelism)
            .thread_name("kiln-worker")
            .enable_all()
            .build()
            .map_err(EngineError::Runtime)?;

        let store = self.store.or_else(|| {
            self.config
                .cache
                .dir
                .as_deref()
                .map(|dir| Arc::new(FsStore::new(dir)) as Arc<dyn PersistentStore>)
        });
        let budget = MemoryBudget {
            max_entries: self.config.cache.max_entries,
            max_bytes: self.config.cache.max_bytes,
            ttl: self.config.cache.ttl(),
        };
        let mut cache = CacheStore::new(budget, store);

        let config_hash =
            ContentHash::combine(&[self.config.config_hash(), self.plugins.fingerprint()]);
        let manifest = runtime.block_on(Manifest::load(&mut cache));

        let (mut graph, generation, config_changed, cold) = match manifest {
            Some(manifest) => {
                let changed = manifest.config_hash != config_hash;
                if changed {
                    info!("configuration changed since the last build, rebuilding all modules");
                }
                cache.restore_index(manifest.index);
                (
                    DependencyGraph::from_snapshot(manifest.graph),
                    manifest.generation,
                    changed,
                    false,
                )
            }
            None => (DependencyGraph::new(), 0, false, true),
        };
        for entry in self.entry_points {
            graph.add_entry_point(entry);
        }

        let plugins = Arc::new(self.plugins);
        let settings = Arc::new(self.config.transform.clone());
        let pool = WorkerPool::new(
            self.transform,
            self.source.clone(),
            plugins.clone(),
            settings,
            self.config.scheduler.parallelism,
        );

        Ok(Engine {
            config: self.config,
            config_hash,
            graph,
            cache,
            pool,
            source: self.source,
            plugins,
            handle: EngineHandle::new(),
            runtime: Arc::new(runtime),
            generation,
            config_changed,
            cold,
        })
    }
}

/// An incremental build engine.
///
/// Owns the dependency graph, the cache store and a tokio runtime. Each
/// call to [`build`](Engine::build) runs one generation through
/// `Idle → Scanning → Invalidating → Scheduling → Done | Failed → Idle`.
/// Generations never overlap; notifications sent through an
/// [`EngineHandle`] while one runs are picked up by the next.
pub struct Engine {
    config: EngineConfig,
    config_hash: ContentHash,
    graph: DependencyGraph,
    cache: CacheStore,
    pool: WorkerPool,
    source: Arc<dyn SourceProvider>,
    plugins: Arc<PluginRegistry>,
    handle: EngineHandle,
    runtime: Arc<Runtime>,
    generation: u64,
    config_changed: bool,
    cold: bool,
}

impl Engine {
    /// Starts configuring an engine.
    pub fn builder(
        config: EngineConfig,
        transform: Arc<dyn Transform>,
        source: Arc<dyn SourceProvider>,
    ) -> EngineBuilder {
        EngineBuilder {
            config,
            transform,
            source,
            store: None,
            plugins: PluginRegistry::new(),
            entry_points: Vec::new(),
        }
    }

    /// Runs one generation for `changed_paths` plus any pending
    /// notifications.
    ///
    /// Module failures are reported in the returned [`BuildReport`]; only
    /// engine invariant violations return `Err`.
    pub fn build<P: AsRef<Path>>(
        &mut self,
        changed_paths: impl IntoIterator<Item = P>,
    ) -> Result<BuildReport, EngineError> {
        let paths: Vec<PathBuf> = changed_paths
            .into_iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();
        let runtime = self.runtime.clone();
        let result = runtime.block_on(self.run_generation(paths));
        if result.is_err() {
            self.handle.set_state(EngineState::Failed);
        }
        self.handle.set_state(EngineState::Idle);
        result
    }

    async fn run_generation(&mut self, paths: Vec<PathBuf>) -> Result<BuildReport, EngineError> {
        let started = Instant::now();
        self.generation += 1;
        let mut report = BuildReport::new(self.generation);
        let stats_before = self.cache.stats();
        self.plugins.build_start(self.generation);
        info!(generation = self.generation, "build started");

        self.handle.set_state(EngineState::Scanning);
        if !paths.is_empty() {
            self.handle.notify_all(&paths);
        }
        self.debounce().await;
        let batch = self.collect_batch();
        let (mut seeds, deleted) = self.scan(&batch, &mut report).await;

        self.handle.set_state(EngineState::Invalidating);
        for id in &deleted {
            seeds.extend(self.graph.dependents_of(id));
            let removed = self.cache.invalidate_module(id).await;
            self.graph.remove_node(id);
            self.handle.forget(id);
            report.removed_modules.insert(id.clone());
            debug!(module = %id, keys = removed, "source deleted");
        }
        seeds.retain(|id| self.graph.contains(id));

        self.handle.set_state(EngineState::Scheduling);
        let mut scheduler = Scheduler::new(
            &mut self.graph,
            &mut self.cache,
            &self.pool,
            self.source.as_ref(),
            &self.plugins,
            &self.handle,
            &mut report,
            self.config_hash,
            self.config.scheduler.max_cycle_iterations,
        );
        scheduler.run(&seeds).await?;

        self.prune(&mut report).await;
        if cfg!(debug_assertions) {
            self.graph.check_consistency().map_err(InternalError::from)?;
        }

        let flush = self.cache.flush().await;
        let manifest_saved = if self.cache.has_persistent() {
            Manifest::new(
                self.config_hash,
                self.generation,
                self.graph.snapshot(),
                self.cache.index().clone(),
            )
            .save(&mut self.cache)
            .await
        } else {
            false
        };
        report.durable = flush.durable && manifest_saved;
        for message in self.cache.take_warnings() {
            report.warnings.push(BuildWarning::CacheIo { message });
        }

        report.stats.cache = self.cache.stats().since(&stats_before);
        report.stats.removed = report.removed_modules.len();
        report.outcome = if report.errors.is_empty() {
            BuildOutcome::Done
        } else {
            BuildOutcome::Failed
        };
        report.duration = started.elapsed();
        self.handle.set_state(match report.outcome {
            BuildOutcome::Done => EngineState::Done,
            BuildOutcome::Failed => EngineState::Failed,
        });

        if report.is_success() {
            info!(
                generation = report.generation,
                updated = report.updated_modules.len(),
                transforms = report.stats.transforms,
                duration_ms = report.duration.as_millis() as u64,
                "build finished"
            );
        } else {
            warn!(
                generation = report.generation,
                errors = report.errors.len(),
                updated = report.updated_modules.len(),
                "build finished with errors"
            );
        }
        self.plugins.build_end(&report);
        Ok(report)
    }

    /// Waits until no notification has arrived for the debounce window.
    async fn debounce(&self) {
        let window = self.config.watch.debounce();
        if window.is_zero() {
            return;
        }
        loop {
            let remaining = self.handle.quiet_remaining(window);
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining).await;
        }
    }

    /// Pending notifications plus everything a cold start or a config
    /// change has to look at.
    fn collect_batch(&mut self) -> BTreeSet<ModuleId> {
        let mut batch = self.handle.drain();
        if std::mem::take(&mut self.config_changed) {
            batch.extend(self.graph.nodes().filter(|n| !n.is_placeholder()).map(|n| n.id.clone()));
        }
        let cold = std::mem::take(&mut self.cold);
        for entry in self.graph.entry_points() {
            let unread = self.graph.get(entry).map_or(true, |n| n.is_placeholder());
            if cold || unread {
                batch.insert(entry.clone());
            }
        }
        batch
    }

    /// Reads every path in `batch`. Returns the modules whose content or
    /// config changed (or whose artifact is missing or does not match their
    /// content) and the modules whose source disappeared.
    async fn scan(
        &mut self,
        batch: &BTreeSet<ModuleId>,
        report: &mut BuildReport,
    ) -> (BTreeSet<ModuleId>, BTreeSet<ModuleId>) {
        let mut changed = BTreeSet::new();
        let mut deleted = BTreeSet::new();
        for id in batch {
            let path = self
                .graph
                .get(id)
                .map(|n| n.path.clone())
                .unwrap_or_else(|| id.as_path());
            match self.source.read(&path) {
                Ok(bytes) => {
                    let hash = ContentHash::from_bytes(&bytes);
                    let modified = self.graph.set_content(id, path, hash, self.config_hash);
                    let key = self
                        .graph
                        .get(id)
                        .and_then(|n| n.artifact_key)
                        .filter(|key| key.content == hash && key.config == self.config_hash);
                    let current = match key {
                        Some(key) => self.cache.contains(&key).await,
                        None => false,
                    };
                    if modified || !current {
                        changed.insert(id.clone());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound && self.graph.contains(id) => {
                    deleted.insert(id.clone());
                }
                Err(e) => {
                    let message = format!("cannot read {}: {e}", path.display());
                    self.graph.set_status(id, ModuleStatus::Errored);
                    report
                        .errors
                        .insert(id.clone(), ModuleError::source_unavailable(message));
                }
            }
        }
        debug!(
            scanned = batch.len(),
            changed = changed.len(),
            deleted = deleted.len(),
            "scan complete"
        );
        (changed, deleted)
    }

    /// Removes modules no entry point reaches any more.
    async fn prune(&mut self, report: &mut BuildReport) {
        for id in self.graph.unreachable_from_entries() {
            self.cache.invalidate_module(&id).await;
            self.graph.remove_node(&id);
            self.handle.forget(&id);
            report.errors.remove(&id);
            report.updated_modules.remove(&id);
            report.stale_modules.remove(&id);
            debug!(module = %id, "pruned unreachable module");
            report.removed_modules.insert(id);
        }
    }

    /// Fetches the current artifact of `id`.
    ///
    /// For a module in the errored state this is its last good artifact.
    pub fn artifact(&mut self, id: &ModuleId) -> Option<Artifact> {
        let key = self.graph.get(id)?.artifact_key?;
        let runtime = self.runtime.clone();
        runtime
            .block_on(self.cache.get(&key))
            .map(|entry| entry.artifact)
    }

    /// Build status of `id`.
    pub fn status(&self, id: &ModuleId) -> Option<ModuleStatus> {
        self.graph.get(id).map(|n| n.status)
    }

    /// A handle for sending change notifications from other threads.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Current phase of the state machine.
    pub fn state(&self) -> EngineState {
        self.handle.state()
    }

    /// The dependency graph as of the last generation.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Number of generations run, including those of earlier processes
    /// sharing the same persistent tier.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The combined config and plugin fingerprint folded into every key.
    pub fn config_hash(&self) -> ContentHash {
        self.config_hash
    }

    /// Content hashes of every module read so far.
    pub fn known_hashes(&self) -> BTreeMap<ModuleId, ContentHash> {
        self.graph
            .nodes()
            .filter_map(|n| n.content_hash.map(|h| (n.id.clone(), h)))
            .collect()
    }

    /// Persistent-tier keys of every module's current artifact, plus the
    /// manifest. Anything else in the persistent tier is superseded.
    pub fn live_storage_keys(&self) -> HashSet<Vec<u8>> {
        let mut keys: HashSet<Vec<u8>> = self
            .graph
            .nodes()
            .filter_map(|n| n.artifact_key)
            .map(|k| k.storage_key())
            .collect();
        keys.insert(MANIFEST_KEY.to_vec());
        keys
    }

    /// Lifetime cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Returns `true` if the persistent tier failed and was dropped.
    pub fn cache_degraded(&self) -> bool {
        self.cache.degraded()
    }
}
