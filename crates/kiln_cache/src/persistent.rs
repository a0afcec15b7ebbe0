//! The persistent cache tier interface.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::CacheError;

/// A key-value store backing the persistent cache tier.
///
/// Implementations may suspend on I/O. They must be safe to call from many
/// tasks at once; background writes for different keys run concurrently.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &[u8]) -> Result<(), CacheError>;
}

/// A persistent tier held in process memory.
///
/// Outlives any single engine when shared through an `Arc`, which makes it a
/// stand-in for a remote cache in tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Returns `true` if `key` is stored.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.lock().contains_key(key)
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.map.lock().get(key).cloned())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        self.map.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> Result<(), CacheError> {
        self.map.lock().remove(key);
        Ok(())
    }
}
