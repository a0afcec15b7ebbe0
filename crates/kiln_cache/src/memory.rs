//! Bounded in-memory cache tier with least-recently-used eviction.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use kiln_common::ArtifactKey;

use crate::entry::CacheEntry;

/// Capacity limits for the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Optional maximum total artifact size in bytes.
    pub max_bytes: Option<u64>,
    /// Optional lifetime of an entry, measured from its creation.
    pub ttl: Option<Duration>,
}

impl MemoryBudget {
    /// A budget limited by entry count only.
    pub fn entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            max_bytes: None,
            ttl: None,
        }
    }
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
    size: u64,
}

/// The fast cache tier.
///
/// Lookups are O(1). Recency is tracked with a monotonically increasing
/// access tick; `order` maps ticks back to keys so the least recently used
/// entry is always the first element.
pub struct MemoryTier {
    entries: HashMap<ArtifactKey, Slot>,
    order: BTreeMap<u64, ArtifactKey>,
    next_tick: u64,
    bytes: u64,
    budget: MemoryBudget,
}

impl MemoryTier {
    /// Creates an empty tier with the given budget.
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            bytes: 0,
            budget,
        }
    }

    /// Looks up an entry, refreshing its recency and access time.
    ///
    /// Entries older than the TTL are dropped and reported as misses.
    pub fn get(&mut self, key: &ArtifactKey, now: u64) -> Option<CacheEntry> {
        let expired = {
            let slot = self.entries.get(key)?;
            self.is_expired(&slot.entry, now)
        };
        if expired {
            self.remove(key);
            return None;
        }

        let tick = self.bump();
        let slot = self.entries.get_mut(key)?;
        self.order.remove(&slot.tick);
        slot.tick = tick;
        slot.entry.last_accessed_at = now;
        self.order.insert(tick, *key);
        Some(slot.entry.clone())
    }

    /// Returns `true` if the tier holds `key`, without touching recency.
    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts an entry and evicts least recently used entries until the
    /// budget holds again. Returns the evicted keys.
    ///
    /// The entry just inserted is never evicted by its own insertion, even if
    /// it alone exceeds the byte budget.
    pub fn insert(&mut self, entry: CacheEntry) -> Vec<ArtifactKey> {
        let key = entry.key;
        self.remove(&key);

        let size = entry.artifact.size();
        let tick = self.bump();
        self.bytes += size;
        self.order.insert(tick, key);
        self.entries.insert(key, Slot { entry, tick, size });

        let mut evicted = Vec::new();
        while self.over_budget() && self.entries.len() > 1 {
            let Some((_, victim)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&victim) {
                self.bytes -= slot.size;
            }
            evicted.push(victim);
        }
        evicted
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &ArtifactKey) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        self.bytes -= slot.size;
        Some(slot.entry)
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total size of held artifacts in bytes.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn over_budget(&self) -> bool {
        self.entries.len() > self.budget.max_entries
            || self.budget.max_bytes.is_some_and(|max| self.bytes > max)
    }

    fn is_expired(&self, entry: &CacheEntry, now: u64) -> bool {
        self.budget
            .ttl
            .is_some_and(|ttl| now.saturating_sub(entry.created_at) > ttl.as_millis() as u64)
    }
}
