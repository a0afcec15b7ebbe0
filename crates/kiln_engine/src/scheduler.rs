//! Recomputing the modules affected by a change batch.
//!
//! The scheduler takes the seeds of a generation, expands them to their
//! transitive dependents and plans that work set into waves of strongly
//! connected components. Single modules in a wave are evaluated in parallel;
//! a cycle is iterated to a fixed point, every member being computed from
//! the previous iteration's output fingerprints of its cycle siblings.
//!
//! Evaluating a module means computing its artifact key from its content,
//! the config hash and the output fingerprints of its dependencies. An
//! unchanged key is skipped, a key found in the cache is restored, and
//! anything else is dispatched to a worker. Because dependents are keyed on
//! output fingerprints, a module whose recomputed output is byte-identical
//! leaves its dependents' keys unchanged and propagation stops there.
//!
//! A transform may report dependencies that differ from the list its key
//! was computed with. The module's edges are then updated and it is planned
//! again behind its new dependencies, up to the configured attempt bound.
//! Unless the output was computed from dependency fingerprints, the planned
//! re-evaluation reuses it under the final key instead of transforming again.

use std::collections::{BTreeSet, HashMap, HashSet};

use kiln_cache::{Artifact, CacheStore};
use kiln_common::{ArtifactKey, ContentHash, InternalError, ModuleId};
use kiln_graph::{plan, Component, DependencyGraph, ModuleStatus};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::pending::EngineHandle;
use crate::plugin::PluginRegistry;
use crate::report::{BuildReport, BuildWarning, ModuleError};
use crate::source::SourceProvider;
use crate::worker::{Finished, Job, JobResult, WorkerPool};

/// Output fingerprints of cycle members from the previous iteration.
type CycleInputs = HashMap<ModuleId, Option<ContentHash>>;

/// A transform result of this generation that did not read dependency
/// fingerprints, valid under any key over the same content.
struct Reusable {
    content: ContentHash,
    artifact: Artifact,
    resolved: Vec<ModuleId>,
}

enum Prepared {
    Settled,
    Dispatch(Job),
    Requeue(BTreeSet<ModuleId>),
}

/// Per-generation scheduling state over borrowed engine parts.
pub(crate) struct Scheduler<'a> {
    graph: &'a mut DependencyGraph,
    cache: &'a mut CacheStore,
    pool: &'a WorkerPool,
    source: &'a dyn SourceProvider,
    plugins: &'a PluginRegistry,
    handle: &'a EngineHandle,
    report: &'a mut BuildReport,
    config_hash: ContentHash,
    max_attempts: u32,
    max_iterations: u32,
    evaluated: HashSet<ModuleId>,
    scanned: HashSet<ModuleId>,
    attempts: HashMap<ModuleId, u32>,
    in_flight: HashSet<ModuleId>,
    dispatch_status: HashMap<ModuleId, ModuleStatus>,
    reusable: HashMap<ModuleId, Reusable>,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: &'a mut DependencyGraph,
        cache: &'a mut CacheStore,
        pool: &'a WorkerPool,
        source: &'a dyn SourceProvider,
        plugins: &'a PluginRegistry,
        handle: &'a EngineHandle,
        report: &'a mut BuildReport,
        config_hash: ContentHash,
        max_iterations: u32,
    ) -> Self {
        Self {
            graph,
            cache,
            pool,
            source,
            plugins,
            handle,
            report,
            config_hash,
            max_attempts: max_iterations,
            max_iterations,
            evaluated: HashSet::new(),
            scanned: HashSet::new(),
            attempts: HashMap::new(),
            in_flight: HashSet::new(),
            dispatch_status: HashMap::new(),
            reusable: HashMap::new(),
        }
    }

    /// Recomputes `seeds` and everything that depends on them.
    pub async fn run(&mut self, seeds: &BTreeSet<ModuleId>) -> Result<(), EngineError> {
        let mut work = self.graph.transitive_dependents(seeds);
        debug!(seeds = seeds.len(), affected = work.len(), "scheduling");

        while !work.is_empty() {
            self.scan_placeholders(&work);
            let waves = plan(&*self.graph, &work);
            let mut next = BTreeSet::new();
            for (i, wave) in waves.iter().enumerate() {
                let requeue = self.run_wave(wave).await?;
                if !requeue.is_empty() {
                    next.extend(requeue);
                    for later in &waves[i + 1..] {
                        for component in later {
                            next.extend(component.members().iter().cloned());
                        }
                    }
                    debug!(replanned = next.len(), "dependencies changed, replanning");
                    break;
                }
            }
            work = next;
        }
        Ok(())
    }

    /// Reads placeholders discovered as dependencies so they can be keyed.
    fn scan_placeholders(&mut self, work: &BTreeSet<ModuleId>) {
        for id in work {
            let Some(node) = self.graph.get(id) else {
                continue;
            };
            if !node.is_placeholder() || !self.scanned.insert(id.clone()) {
                continue;
            }
            let path = node.path.clone();
            match self.source.read(&path) {
                Ok(bytes) => {
                    let hash = ContentHash::from_bytes(&bytes);
                    self.graph.set_content(id, path, hash, self.config_hash);
                }
                Err(e) => {
                    let message = format!("cannot read {}: {e}", path.display());
                    self.fail(id, ModuleError::source_unavailable(message));
                }
            }
        }
    }

    async fn run_wave(&mut self, wave: &[Component]) -> Result<BTreeSet<ModuleId>, EngineError> {
        let singles: Vec<ModuleId> = wave
            .iter()
            .filter_map(|c| match c {
                Component::Single(id) => Some(id.clone()),
                Component::Cycle(_) => None,
            })
            .collect();
        let mut requeue = self.run_batch(&singles, None).await?;
        for component in wave {
            if let Component::Cycle(members) = component {
                requeue.extend(self.run_cycle(members).await?);
            }
        }
        Ok(requeue)
    }

    /// Evaluates a cycle until no member's output fingerprint changes.
    async fn run_cycle(&mut self, members: &[ModuleId]) -> Result<BTreeSet<ModuleId>, EngineError> {
        let mut previous = self.output_hashes(members);
        for iteration in 1..=self.max_iterations {
            self.report.stats.cycle_iterations += 1;
            let requeue = self.run_batch(members, Some(&previous)).await?;
            if !requeue.is_empty() {
                let mut requeue = requeue;
                if members.iter().any(|m| requeue.contains(m)) {
                    requeue.extend(members.iter().cloned());
                }
                return Ok(requeue);
            }
            let current = self.output_hashes(members);
            if current == previous {
                debug!(members = members.len(), iteration, "cycle converged");
                return Ok(BTreeSet::new());
            }
            previous = current;
        }

        warn!(
            members = members.len(),
            iterations = self.max_iterations,
            "cycle did not converge"
        );
        self.report.degraded = true;
        self.report.warnings.push(BuildWarning::CyclicBuildNonConvergence {
            members: members.to_vec(),
            iterations: self.max_iterations,
        });
        Ok(BTreeSet::new())
    }

    fn output_hashes(&self, members: &[ModuleId]) -> CycleInputs {
        members
            .iter()
            .map(|m| (m.clone(), self.graph.get(m).and_then(|n| n.output_hash)))
            .collect()
    }

    /// Evaluates independent modules, running dispatched transforms in
    /// parallel. Returns modules that must be planned again.
    async fn run_batch(
        &mut self,
        ids: &[ModuleId],
        cycle_inputs: Option<&CycleInputs>,
    ) -> Result<BTreeSet<ModuleId>, EngineError> {
        let mut requeue = BTreeSet::new();
        let mut tasks: JoinSet<Finished> = JoinSet::new();

        for id in ids {
            match self.prepare(id, cycle_inputs).await {
                Prepared::Settled => {}
                Prepared::Requeue(more) => requeue.extend(more),
                Prepared::Dispatch(job) => {
                    if !self.in_flight.insert(job.id.clone()) {
                        return Err(InternalError::new(format!("{} dispatched twice", job.id)).into());
                    }
                    debug!(module = %job.id, key = %job.key, "dispatching transform");
                    self.report.stats.transforms += 1;
                    self.pool.spawn(&mut tasks, job);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let finished =
                joined.map_err(|e| InternalError::new(format!("worker task failed: {e}")))?;
            self.in_flight.remove(&finished.job.id);
            requeue.extend(self.complete(finished).await);
        }
        Ok(requeue)
    }

    async fn prepare(&mut self, id: &ModuleId, cycle_inputs: Option<&CycleInputs>) -> Prepared {
        let Some(node) = self.graph.get(id) else {
            return Prepared::Settled;
        };
        let Some(content) = node.content_hash else {
            // unreadable placeholder, already reported
            return Prepared::Settled;
        };
        self.evaluated.insert(id.clone());
        self.report.stats.evaluated += 1;

        let path = node.path.clone();
        let previous_key = node.artifact_key;
        let has_output = node.output_hash.is_some();
        let dependency_ids = node.dependency_ids.clone();

        let mut dependencies = Vec::with_capacity(dependency_ids.len());
        let mut tainted = false;
        for dep in dependency_ids {
            let fingerprint = match cycle_inputs.and_then(|inputs| inputs.get(&dep)) {
                Some(&previous) => previous.unwrap_or(ContentHash::EMPTY),
                None => {
                    let Some(dep_node) = self.graph.get(&dep) else {
                        self.fail(id, ModuleError::dependency_failed(&dep));
                        return Prepared::Settled;
                    };
                    let Some(hash) = dep_node.output_hash else {
                        self.fail(id, ModuleError::dependency_failed(&dep));
                        return Prepared::Settled;
                    };
                    if matches!(dep_node.status, ModuleStatus::Errored | ModuleStatus::Stale) {
                        tainted = true;
                    }
                    hash
                }
            };
            dependencies.push((dep, fingerprint));
        }

        let fingerprints: Vec<ContentHash> = dependencies.iter().map(|(_, h)| *h).collect();
        let key = ArtifactKey::new(id, content, self.config_hash, &fingerprints);
        let status = if tainted {
            ModuleStatus::Stale
        } else {
            ModuleStatus::Ready
        };

        if previous_key == Some(key) && has_output && self.cache.contains(&key).await {
            self.report.stats.skipped += 1;
            self.report.errors.remove(id);
            self.graph.set_status(id, status);
            if tainted {
                self.report.stale_modules.insert(id.clone());
            }
            return Prepared::Settled;
        }

        let reused = self
            .reusable
            .get(id)
            .filter(|r| r.content == content)
            .map(|r| (r.artifact.clone(), r.resolved.clone()));
        if let Some((artifact, resolved)) = reused {
            debug!(module = %id, %key, "reusing output under final key");
            self.report.stats.reused += 1;
            let requeue = self.accept(id, key, artifact.output_hash, resolved, status);
            if !requeue.is_empty() {
                return Prepared::Requeue(requeue);
            }
            self.cache.put(id, key, artifact).await;
            return Prepared::Settled;
        }

        if let Some(entry) = self.cache.get(&key).await {
            debug!(module = %id, %key, "restored from cache");
            self.report.stats.restored += 1;
            let resolved = self.plugins.resolve_all(id, &entry.artifact.dependencies);
            let requeue = self.accept(id, key, entry.artifact.output_hash, resolved, status);
            return if requeue.is_empty() {
                Prepared::Settled
            } else {
                Prepared::Requeue(requeue)
            };
        }

        self.dispatch_status.insert(id.clone(), status);
        Prepared::Dispatch(Job {
            id: id.clone(),
            path,
            expected: content,
            stamp: self.handle.stamp(id),
            key,
            dependencies,
        })
    }

    async fn complete(&mut self, finished: Finished) -> BTreeSet<ModuleId> {
        let Finished { job, result } = finished;
        let status = self
            .dispatch_status
            .remove(&job.id)
            .unwrap_or(ModuleStatus::Ready);

        if matches!(result, JobResult::Outdated) || self.handle.stamp(&job.id) != job.stamp {
            debug!(module = %job.id, "discarding result computed from outdated source");
            self.report.stats.discarded += 1;
            self.handle.requeue(job.id);
            return BTreeSet::new();
        }

        match result {
            JobResult::Built {
                artifact,
                resolved,
                reads_dependencies,
            } => {
                if !reads_dependencies {
                    self.reusable.insert(
                        job.id.clone(),
                        Reusable {
                            content: job.expected,
                            artifact: artifact.clone(),
                            resolved: resolved.clone(),
                        },
                    );
                }
                let output_hash = artifact.output_hash;
                self.cache.put(&job.id, job.key, artifact).await;
                self.accept(&job.id, job.key, output_hash, resolved, status)
            }
            JobResult::Failed(error) => {
                self.fail(&job.id, error);
                BTreeSet::new()
            }
            JobResult::Outdated => BTreeSet::new(),
        }
    }

    /// Records a good result, unless its dependencies changed and the module
    /// has attempts left, in which case the module and any new dependencies
    /// are returned for replanning.
    fn accept(
        &mut self,
        id: &ModuleId,
        key: ArtifactKey,
        output_hash: ContentHash,
        resolved: Vec<ModuleId>,
        status: ModuleStatus,
    ) -> BTreeSet<ModuleId> {
        let change = self.graph.set_dependencies(id, resolved);
        let mut requeue = BTreeSet::new();
        if change.is_changed() {
            let attempts = self.attempts.entry(id.clone()).or_insert(0);
            *attempts += 1;
            let attempts = *attempts;
            if attempts <= self.max_attempts {
                requeue.insert(id.clone());
                requeue.extend(change.created.iter().cloned());
                for dep in &change.added {
                    let unevaluated = self
                        .graph
                        .get(dep)
                        .is_some_and(|n| !n.has_artifact() && !self.evaluated.contains(dep))
                        && !self.scanned.contains(dep);
                    if unevaluated {
                        requeue.insert(dep.clone());
                    }
                }
                debug!(
                    module = %id,
                    added = change.added.len(),
                    removed = change.removed.len(),
                    "dependencies changed"
                );
                return requeue;
            }
            warn!(module = %id, attempts, "dependencies did not settle");
            self.report.warnings.push(BuildWarning::DependencyChurn {
                module: id.clone(),
                attempts,
            });
        }

        let previous = self.graph.get(id).and_then(|n| n.artifact_key);
        self.cache.record_key(id, key);
        self.graph.record_artifact(id, key, output_hash, status);
        self.report.errors.remove(id);
        if previous != Some(key) {
            self.report.updated_modules.insert(id.clone());
        }
        if status == ModuleStatus::Stale {
            self.report.stale_modules.insert(id.clone());
        }
        requeue
    }

    fn fail(&mut self, id: &ModuleId, error: ModuleError) {
        debug!(module = %id, error = %error, "module failed");
        self.graph.set_status(id, ModuleStatus::Errored);
        self.report.stale_modules.remove(id);
        self.report.errors.insert(id.clone(), error);
    }
}
