//! The two-tier cache store.

use std::sync::Arc;

use kiln_common::{ArtifactKey, ModuleId};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::entry::{now_millis, Artifact, CacheEntry};
use crate::error::CacheError;
use crate::index::ModuleKeyIndex;
use crate::memory::{MemoryBudget, MemoryTier};
use crate::persistent::PersistentStore;

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by the memory tier.
    pub memory_hits: u64,
    /// Lookups answered by the persistent tier.
    pub persistent_hits: u64,
    /// Lookups answered by neither tier.
    pub misses: u64,
    /// Entries evicted from the memory tier.
    pub evictions: u64,
    /// Persistent writes acknowledged.
    pub writes: u64,
    /// Persistent writes that failed.
    pub write_failures: u64,
}

impl CacheStats {
    /// Counter-wise difference from an earlier snapshot.
    pub fn since(&self, earlier: &CacheStats) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits - earlier.memory_hits,
            persistent_hits: self.persistent_hits - earlier.persistent_hits,
            misses: self.misses - earlier.misses,
            evictions: self.evictions - earlier.evictions,
            writes: self.writes - earlier.writes,
            write_failures: self.write_failures - earlier.write_failures,
        }
    }
}

/// Outcome of [`CacheStore::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Background writes acknowledged by this flush.
    pub written: usize,
    /// Background writes that failed.
    pub failures: usize,
    /// `true` if every write since the previous flush reached a healthy
    /// persistent tier.
    pub durable: bool,
}

type WriteResult = (ArtifactKey, Result<(), CacheError>);

/// Memory tier in front of an optional persistent tier.
///
/// Reads check memory first and promote persistent hits. Writes land in
/// memory immediately and are copied to the persistent tier in background
/// tasks, which [`flush`](Self::flush) awaits. Any persistent failure drops
/// the persistent tier for the rest of the store's life; the failure is
/// logged and kept as a warning for the caller to report.
///
/// Background writes are spawned on the ambient tokio runtime, so every
/// async method must be called from within one.
pub struct CacheStore {
    memory: MemoryTier,
    persistent: Option<Arc<dyn PersistentStore>>,
    index: ModuleKeyIndex,
    writes: JoinSet<WriteResult>,
    stats: CacheStats,
    warnings: Vec<String>,
    degraded: bool,
}

impl CacheStore {
    /// Creates a store with the given memory budget and persistent tier.
    pub fn new(budget: MemoryBudget, persistent: Option<Arc<dyn PersistentStore>>) -> Self {
        Self {
            memory: MemoryTier::new(budget),
            persistent,
            index: ModuleKeyIndex::new(),
            writes: JoinSet::new(),
            stats: CacheStats::default(),
            warnings: Vec::new(),
            degraded: false,
        }
    }

    /// Creates a store without a persistent tier.
    pub fn memory_only(budget: MemoryBudget) -> Self {
        Self::new(budget, None)
    }

    /// Looks up `key`, memory tier first.
    pub async fn get(&mut self, key: &ArtifactKey) -> Option<CacheEntry> {
        let now = now_millis();
        if let Some(entry) = self.memory.get(key, now) {
            self.stats.memory_hits += 1;
            return Some(entry);
        }
        match self.read_persistent(key, now).await {
            Some(entry) => {
                self.stats.persistent_hits += 1;
                Some(entry)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Returns `true` if either tier can still serve `key`.
    ///
    /// Not counted in the hit and miss statistics. A persistent entry found
    /// here is promoted into memory like a regular hit.
    pub async fn contains(&mut self, key: &ArtifactKey) -> bool {
        let now = now_millis();
        self.memory.get(key, now).is_some() || self.read_persistent(key, now).await.is_some()
    }

    async fn read_persistent(&mut self, key: &ArtifactKey, now: u64) -> Option<CacheEntry> {
        let store = self.persistent.clone()?;
        let found = match store.get(&key.storage_key()).await {
            Ok(found) => found,
            Err(e) => {
                self.degrade(&e);
                None
            }
        };
        let mut entry = found.and_then(|bytes| match CacheEntry::decode(&bytes) {
            Ok(entry) if entry.key == *key => Some(entry),
            Ok(_) => {
                debug!(%key, "persistent entry stored under a different key");
                None
            }
            Err(e) => {
                debug!(%key, error = %e, "undecodable persistent entry");
                None
            }
        })?;
        entry.last_accessed_at = now;
        self.insert_memory(entry.clone());
        Some(entry)
    }

    /// Returns `true` if the memory tier holds `key`.
    pub fn contains_in_memory(&self, key: &ArtifactKey) -> bool {
        self.memory.contains(key)
    }

    /// Stores an artifact produced by `module` under `key`.
    ///
    /// The memory tier is updated before returning; the persistent write runs
    /// in the background until the next [`flush`](Self::flush).
    pub async fn put(&mut self, module: &ModuleId, key: ArtifactKey, artifact: Artifact) -> CacheEntry {
        let entry = CacheEntry::new(key, artifact);
        self.index.record(module, key);
        self.insert_memory(entry.clone());

        if let Some(store) = self.persistent.clone() {
            match entry.encode() {
                Ok(bytes) => {
                    let storage_key = key.storage_key();
                    self.writes.spawn(async move {
                        let result = store.set(&storage_key, &bytes).await;
                        (key, result)
                    });
                }
                Err(e) => warn!(%key, error = %e, "failed to encode cache entry"),
            }
        }
        entry
    }

    /// Records that `module` uses `key` without storing anything.
    pub fn record_key(&mut self, module: &ModuleId, key: ArtifactKey) {
        self.index.record(module, key);
    }

    /// Removes `key` from both tiers.
    pub async fn invalidate(&mut self, key: &ArtifactKey) {
        self.memory.remove(key);
        self.index.forget(key);
        if let Some(store) = self.persistent.clone() {
            if let Err(e) = store.remove(&key.storage_key()).await {
                self.degrade(&e);
            }
        }
    }

    /// Removes every key `module` has produced. Returns how many were removed.
    pub async fn invalidate_module(&mut self, module: &ModuleId) -> usize {
        let keys = self.index.take(module);
        for key in &keys {
            self.invalidate(key).await;
        }
        keys.len()
    }

    /// Awaits every outstanding background write.
    pub async fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        while let Some(joined) = self.writes.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {
                    report.written += 1;
                    self.stats.writes += 1;
                }
                Ok((key, Err(e))) => {
                    report.failures += 1;
                    self.stats.write_failures += 1;
                    debug!(%key, "persistent write failed");
                    self.degrade(&e);
                }
                Err(e) => {
                    report.failures += 1;
                    self.stats.write_failures += 1;
                    self.degrade(&CacheError::Backend {
                        reason: format!("write task failed: {e}"),
                    });
                }
            }
        }
        report.durable = report.failures == 0 && self.persistent.is_some();
        report
    }

    /// Reads an auxiliary blob from the persistent tier.
    pub async fn load_blob(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let store = self.persistent.clone()?;
        match store.get(key).await {
            Ok(found) => found,
            Err(e) => {
                self.degrade(&e);
                None
            }
        }
    }

    /// Writes an auxiliary blob to the persistent tier, waiting for the
    /// acknowledgement. Returns `false` if the blob was not stored.
    pub async fn store_blob(&mut self, key: &[u8], value: &[u8]) -> bool {
        let Some(store) = self.persistent.clone() else {
            return false;
        };
        match store.set(key, value).await {
            Ok(()) => true,
            Err(e) => {
                self.degrade(&e);
                false
            }
        }
    }

    /// Returns `true` if a persistent tier is attached and healthy.
    pub fn has_persistent(&self) -> bool {
        self.persistent.is_some()
    }

    /// Returns `true` if the persistent tier was dropped after a failure.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Drains warnings recorded since the last call.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Lifetime counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of entries in the memory tier.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// The module→keys index.
    pub fn index(&self) -> &ModuleKeyIndex {
        &self.index
    }

    /// Replaces the module→keys index, e.g. with one loaded from a manifest.
    pub fn restore_index(&mut self, index: ModuleKeyIndex) {
        self.index = index;
    }

    fn insert_memory(&mut self, entry: CacheEntry) {
        let evicted = self.memory.insert(entry);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted memory entries");
            self.stats.evictions += evicted.len() as u64;
        }
    }

    fn degrade(&mut self, error: &CacheError) {
        if self.persistent.take().is_some() {
            warn!(error = %error, "persistent cache failed, continuing with memory tier only");
            self.degraded = true;
        }
        self.warnings.push(error.to_string());
    }
}
