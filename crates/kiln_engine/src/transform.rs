//! The per-module transform consumed by the engine.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use kiln_common::{ContentHash, ModuleId};
use kiln_config::TransformSettings;
use serde::Serialize;

/// Everything a transform may look at.
///
/// The engine guarantees that equal inputs share an artifact key, so a
/// transform must be a pure function of these fields.
#[derive(Debug, Clone)]
pub struct TransformInput {
    /// The module being transformed.
    pub id: ModuleId,
    /// Its source location.
    pub path: PathBuf,
    /// Raw source bytes.
    pub source: Vec<u8>,
    /// Transform options from `kiln.toml`.
    pub config: Arc<TransformSettings>,
    /// Output fingerprints of the module's known dependencies, in import
    /// order.
    pub dependencies: Vec<(ModuleId, ContentHash)>,
}

/// What a transform produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutput {
    /// Output bytes.
    pub output: Vec<u8>,
    /// Import specifiers found in the source, in order of appearance.
    pub dependencies: Vec<String>,
    /// Set if `output` was computed from [`TransformInput::dependencies`].
    ///
    /// When a transform discovers dependencies the engine did not know about,
    /// only outputs with this flag are transformed again once those
    /// dependencies are built; the others are kept as they are.
    pub reads_dependencies: bool,
}

/// A position in a source file, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

impl SourceLocation {
    /// Creates a location.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Why a transform failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransformErrorKind {
    /// The source is malformed.
    Parse,
    /// The source parsed but could not be transformed.
    Transform,
}

/// A failed transform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransformError {
    /// Failure category.
    pub kind: TransformErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Where in the source the failure was detected.
    pub location: Option<SourceLocation>,
}

impl TransformError {
    /// A parse failure at `location`.
    pub fn parse(message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            kind: TransformErrorKind::Parse,
            message: message.into(),
            location: Some(location),
        }
    }

    /// A transform failure, optionally located.
    pub fn transform(message: impl Into<String>, location: Option<SourceLocation>) -> Self {
        Self {
            kind: TransformErrorKind::Transform,
            message: message.into(),
            location,
        }
    }
}

/// A per-module transform.
///
/// Runs on blocking worker threads, several modules at a time.
pub trait Transform: Send + Sync {
    /// Transforms one module.
    fn transform(&self, input: &TransformInput) -> Result<TransformOutput, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&TransformInput) -> Result<TransformOutput, TransformError> + Send + Sync,
{
    fn transform(&self, input: &TransformInput) -> Result<TransformOutput, TransformError> {
        self(input)
    }
}
