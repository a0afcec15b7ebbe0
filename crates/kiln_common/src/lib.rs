//! Shared foundational types used across the Kiln build engine.
//!
//! This crate provides content hashing, stable module identifiers, composite
//! artifact keys, and common result types.

#![warn(missing_docs)]

pub mod hash;
pub mod key;
pub mod module_id;
pub mod result;

pub use hash::ContentHash;
pub use key::ArtifactKey;
pub use module_id::ModuleId;
pub use result::{InternalError, KilnResult};
