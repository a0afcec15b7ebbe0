//! Incremental build engine.
//!
//! The [`Engine`] keeps a dependency graph of modules and a two-tier cache
//! of their transformed outputs. Given a batch of changed paths it re-runs
//! the [`Transform`] only for modules whose composite key changed, in
//! dependency order and with bounded parallelism, and reports what happened
//! in a [`BuildReport`].

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod manifest;
pub mod pending;
pub mod plugin;
pub mod report;
mod scheduler;
pub mod source;
pub mod transform;
mod worker;

pub use engine::{Engine, EngineBuilder};
pub use error::EngineError;
pub use manifest::{Manifest, MANIFEST_KEY};
pub use pending::{EngineHandle, EngineState};
pub use plugin::{HookPoint, Plugin, PluginRegistry};
pub use report::{
    BuildOutcome, BuildReport, BuildStats, BuildWarning, ModuleError, ModuleErrorKind,
};
pub use source::{FsSource, MemorySource, SourceProvider};
pub use transform::{
    SourceLocation, Transform, TransformError, TransformErrorKind, TransformInput, TransformOutput,
};
