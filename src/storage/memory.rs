//! In-memory cache storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::request::{CacheKey, Response};

type Partition = HashMap<CacheKey, Response>;

/// Partitions held in process memory, enumerated in creation order.
///
/// Clones share the same underlying partitions.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    partitions: Arc<Mutex<Vec<(String, Partition)>>>,
}

impl MemoryCacheStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<(String, Partition)>>> {
        self.partitions
            .lock()
            .map_err(|_| Error::Storage("memory storage lock poisoned".to_string()))
    }

    /// Number of entries in a partition, zero if it does not exist.
    #[must_use]
    pub fn len(&self, name: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|parts| {
                parts
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, p)| p.len())
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut parts = self.lock()?;
        if !parts.iter().any(|(n, _)| n == name) {
            parts.push((name.to_string(), Partition::new()));
        }
        Ok(())
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<Response>> {
        let parts = self.lock()?;
        Ok(parts
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, p)| p.get(key).cloned()))
    }

    async fn match_any(&self, key: &CacheKey) -> Result<Option<Response>> {
        let parts = self.lock()?;
        Ok(parts.iter().find_map(|(_, p)| p.get(key).cloned()))
    }

    async fn put(&self, name: &str, key: &CacheKey, response: Response) -> Result<()> {
        let mut parts = self.lock()?;
        if let Some((_, partition)) = parts.iter_mut().find(|(n, _)| n == name) {
            partition.insert(key.clone(), response);
        } else {
            let mut partition = Partition::new();
            partition.insert(key.clone(), response);
            parts.push((name.to_string(), partition));
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut parts = self.lock()?;
        let before = parts.len();
        parts.retain(|(n, _)| n != name);
        Ok(parts.len() != before)
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheKey>> {
        let parts = self.lock()?;
        let mut keys: Vec<CacheKey> = parts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}
