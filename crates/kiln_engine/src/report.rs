//! The outcome of one build generation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use kiln_cache::CacheStats;
use kiln_common::ModuleId;

use crate::transform::{SourceLocation, TransformError, TransformErrorKind};

/// Category of a module failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleErrorKind {
    /// The source is malformed.
    ParseFailure,
    /// The transform rejected the source.
    TransformError,
    /// The source could not be read.
    SourceUnavailable,
    /// A dependency failed and has no good artifact to build against.
    DependencyFailed,
}

/// A failure recorded against one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleError {
    /// Failure category.
    pub kind: ModuleErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Source position, when the transform reported one.
    pub location: Option<SourceLocation>,
}

impl ModuleError {
    /// The source could not be read.
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ModuleErrorKind::SourceUnavailable,
            message: message.into(),
            location: None,
        }
    }

    /// `dependency` failed without leaving a good artifact.
    pub fn dependency_failed(dependency: &ModuleId) -> Self {
        Self {
            kind: ModuleErrorKind::DependencyFailed,
            message: format!("dependency {dependency} has no usable artifact"),
            location: None,
        }
    }
}

impl From<TransformError> for ModuleError {
    fn from(err: TransformError) -> Self {
        let kind = match err.kind {
            TransformErrorKind::Parse => ModuleErrorKind::ParseFailure,
            TransformErrorKind::Transform => ModuleErrorKind::TransformError,
        };
        Self {
            kind,
            message: err.message,
            location: err.location,
        }
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{loc}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A non-fatal problem with the build as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    /// The persistent cache failed; the engine continues from memory.
    CacheIo {
        /// Description of the failure.
        message: String,
    },
    /// A cycle did not reach a fixed point; the last iteration was kept.
    CyclicBuildNonConvergence {
        /// Members of the cycle.
        members: Vec<ModuleId>,
        /// Iterations run.
        iterations: u32,
    },
    /// A module kept reporting different dependencies; the last result was kept.
    DependencyChurn {
        /// The module.
        module: ModuleId,
        /// Transforms attempted this generation.
        attempts: u32,
    },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildWarning::CacheIo { message } => write!(f, "cache unavailable: {message}"),
            BuildWarning::CyclicBuildNonConvergence {
                members,
                iterations,
            } => {
                let names: Vec<&str> = members.iter().map(ModuleId::as_str).collect();
                write!(
                    f,
                    "cycle [{}] did not converge after {iterations} iterations",
                    names.join(", ")
                )
            }
            BuildWarning::DependencyChurn { module, attempts } => write!(
                f,
                "dependencies of {module} still changing after {attempts} attempts"
            ),
        }
    }
}

/// Terminal state of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Every scheduled module produced a good artifact.
    Done,
    /// At least one module failed.
    Failed,
}

/// Work counters for one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Modules evaluated (skipped, restored, or transformed).
    pub evaluated: usize,
    /// Transform invocations.
    pub transforms: usize,
    /// Artifacts restored from the cache instead of transformed.
    pub restored: usize,
    /// Results rekeyed after their dependencies were discovered, without
    /// transforming again.
    pub reused: usize,
    /// Modules whose key was unchanged.
    pub skipped: usize,
    /// Results thrown away because the source changed mid-flight.
    pub discarded: usize,
    /// Fixed-point iterations run across all cycles.
    pub cycle_iterations: usize,
    /// Modules removed because they were deleted or unreachable.
    pub removed: usize,
    /// Cache counters for this generation.
    pub cache: CacheStats,
}

/// Everything a caller learns from a build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Sequence number of the generation, starting at 1.
    pub generation: u64,
    /// Whether any module failed.
    pub outcome: BuildOutcome,
    /// Modules whose artifact key changed.
    pub updated_modules: BTreeSet<ModuleId>,
    /// Modules that failed this generation.
    pub errors: BTreeMap<ModuleId, ModuleError>,
    /// Build-wide problems.
    pub warnings: Vec<BuildWarning>,
    /// Modules built against a failed dependency's last good artifact.
    pub stale_modules: BTreeSet<ModuleId>,
    /// Modules removed from the graph.
    pub removed_modules: BTreeSet<ModuleId>,
    /// Set when a cycle failed to converge.
    pub degraded: bool,
    /// Set when every artifact and the manifest reached the persistent tier.
    pub durable: bool,
    /// Work counters.
    pub stats: BuildStats,
    /// Wall-clock time of the generation.
    pub duration: Duration,
}

impl BuildReport {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            outcome: BuildOutcome::Done,
            updated_modules: BTreeSet::new(),
            errors: BTreeMap::new(),
            warnings: Vec::new(),
            stale_modules: BTreeSet::new(),
            removed_modules: BTreeSet::new(),
            degraded: false,
            durable: false,
            stats: BuildStats::default(),
            duration: Duration::ZERO,
        }
    }

    /// Returns `true` if no module failed.
    pub fn is_success(&self) -> bool {
        self.outcome == BuildOutcome::Done
    }

    /// Returns `true` if a warning of the given shape was recorded.
    pub fn has_warning(&self, predicate: impl Fn(&BuildWarning) -> bool) -> bool {
        self.warnings.iter().any(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_errors_map_to_module_kinds() {
        let parse: ModuleError = TransformError::parse("bad", SourceLocation::new(1, 2)).into();
        assert_eq!(parse.kind, ModuleErrorKind::ParseFailure);
        assert_eq!(parse.to_string(), "1:2: bad");

        let transform: ModuleError = TransformError::transform("nope", None).into();
        assert_eq!(transform.kind, ModuleErrorKind::TransformError);
        assert_eq!(transform.to_string(), "nope");
    }

    #[test]
    fn warning_display() {
        let w = BuildWarning::CyclicBuildNonConvergence {
            members: vec![ModuleId::from("a"), ModuleId::from("b")],
            iterations: 8,
        };
        assert_eq!(w.to_string(), "cycle [a, b] did not converge after 8 iterations");
    }

    #[test]
    fn fresh_report_is_success() {
        let report = BuildReport::new(3);
        assert!(report.is_success());
        assert_eq!(report.generation, 3);
        assert!(!report.has_warning(|w| matches!(w, BuildWarning::CacheIo { .. })));
    }
}
