//! Worker tasks that run transforms.
//!
//! Each job is a tokio task that waits for a permit from the pool's
//! semaphore and then runs the synchronous transform on the blocking thread
//! pool. Workers see only owned inputs and hand their result back as the
//! task's output; they never touch the graph or the cache.

use std::path::PathBuf;
use std::sync::Arc;

use kiln_cache::Artifact;
use kiln_common::{ArtifactKey, ContentHash, ModuleId};
use kiln_config::TransformSettings;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::plugin::PluginRegistry;
use crate::report::ModuleError;
use crate::source::SourceProvider;
use crate::transform::{Transform, TransformError, TransformInput};

/// One dispatched transform.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub id: ModuleId,
    pub path: PathBuf,
    /// Content hash the orchestrator saw when it computed `key`.
    pub expected: ContentHash,
    /// Notification stamp of the path at dispatch.
    pub stamp: u64,
    pub key: ArtifactKey,
    pub dependencies: Vec<(ModuleId, ContentHash)>,
}

#[derive(Debug)]
pub(crate) enum JobResult {
    Built {
        artifact: Artifact,
        resolved: Vec<ModuleId>,
        reads_dependencies: bool,
    },
    Failed(ModuleError),
    /// The source no longer hashes to `expected`; nothing was transformed.
    Outdated,
}

#[derive(Debug)]
pub(crate) struct Finished {
    pub job: Job,
    pub result: JobResult,
}

/// Shared resources for running jobs.
#[derive(Clone)]
pub(crate) struct WorkerPool {
    transform: Arc<dyn Transform>,
    source: Arc<dyn SourceProvider>,
    plugins: Arc<PluginRegistry>,
    settings: Arc<TransformSettings>,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(
        transform: Arc<dyn Transform>,
        source: Arc<dyn SourceProvider>,
        plugins: Arc<PluginRegistry>,
        settings: Arc<TransformSettings>,
        parallelism: usize,
    ) -> Self {
        Self {
            transform,
            source,
            plugins,
            settings,
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    /// Spawns `job` onto `tasks`.
    pub fn spawn(&self, tasks: &mut JoinSet<Finished>, job: Job) {
        let pool = self.clone();
        tasks.spawn(async move {
            let Ok(_permit) = pool.permits.clone().acquire_owned().await else {
                let result = JobResult::Failed(
                    TransformError::transform("worker pool shut down", None).into(),
                );
                return Finished { job, result };
            };

            let blocking_job = job.clone();
            let result = match tokio::task::spawn_blocking(move || pool.execute(&blocking_job)).await {
                Ok(result) => result,
                Err(e) => {
                    error!(module = %job.id, error = %e, "transform panicked");
                    JobResult::Failed(
                        TransformError::transform(format!("transform panicked: {e}"), None).into(),
                    )
                }
            };
            Finished { job, result }
        });
    }

    fn execute(&self, job: &Job) -> JobResult {
        let source = match self.source.read(&job.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return JobResult::Failed(ModuleError::source_unavailable(format!(
                    "cannot read {}: {e}",
                    job.path.display()
                )))
            }
        };
        if ContentHash::from_bytes(&source) != job.expected {
            debug!(module = %job.id, "source changed since dispatch");
            return JobResult::Outdated;
        }

        let input = TransformInput {
            id: job.id.clone(),
            path: job.path.clone(),
            source,
            config: self.settings.clone(),
            dependencies: job.dependencies.clone(),
        };
        match self.transform.transform(&input) {
            Ok(out) => {
                let mut output = out.output;
                let extra = self.plugins.generate(&job.id, &output);
                output.extend_from_slice(&extra);
                let resolved = self.plugins.resolve_all(&job.id, &out.dependencies);
                JobResult::Built {
                    artifact: Artifact::new(output, out.dependencies),
                    resolved,
                    reads_dependencies: out.reads_dependencies,
                }
            }
            Err(e) => JobResult::Failed(e.into()),
        }
    }
}
