//! Errors that abort an engine operation.
//!
//! Module-level failures never show up here. They are recorded in the
//! [`BuildReport`](crate::report::BuildReport) and the build still returns
//! `Ok`.

use kiln_common::InternalError;
use kiln_config::ConfigError;

/// A fatal engine error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The async runtime could not be created.
    #[error("failed to start engine runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An engine invariant was violated.
    #[error(transparent)]
    Internal(#[from] InternalError),
}
