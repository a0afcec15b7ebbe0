//! Two-tier artifact cache for incremental rebuilds.
//!
//! Transformed module outputs are stored under their composite
//! [`ArtifactKey`](kiln_common::ArtifactKey). Lookups hit a bounded in-memory
//! LRU tier first and fall back to a persistent key-value tier, promoting hits
//! back into memory. Persistent writes run in the background and are awaited
//! by [`CacheStore::flush`]. A failing persistent tier degrades the store to
//! memory-only operation instead of failing the build.

#![warn(missing_docs)]

pub mod artifact;
pub mod entry;
pub mod error;
pub mod hasher;
pub mod index;
pub mod memory;
pub mod persistent;
pub mod store;

pub use artifact::FsStore;
pub use entry::{now_millis, Artifact, CacheEntry};
pub use error::CacheError;
pub use hasher::{ChangeSet, SourceHasher};
pub use index::ModuleKeyIndex;
pub use memory::{MemoryBudget, MemoryTier};
pub use persistent::{MemoryStore, PersistentStore};
pub use store::{CacheStats, CacheStore, FlushReport};
