//! Cache storage abstraction: named partitions of request/response pairs.

mod disk;
mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::request::{CacheKey, Response};

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// The cache storage surface consumed by the worker.
///
/// Implementations are plain key-value stores; the worker decides what is
/// allowed in. All methods may be called concurrently.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens a partition, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<()>;

    /// Looks up `key` in one partition. A missing partition is a miss.
    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<Response>>;

    /// Looks up `key` across all partitions, in enumeration order.
    async fn match_any(&self, key: &CacheKey) -> Result<Option<Response>> {
        for name in self.keys().await? {
            if let Some(hit) = self.match_in(&name, key).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    /// Stores `response` under `key`, creating the partition if needed.
    /// An existing entry is replaced.
    async fn put(&self, name: &str, key: &CacheKey, response: Response) -> Result<()>;

    /// Enumerates partition names.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Deletes a partition. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Enumerates the keys stored in a partition.
    async fn entries(&self, name: &str) -> Result<Vec<CacheKey>>;

    /// Returns true if the partition exists.
    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.keys().await?.iter().any(|k| k == name))
    }
}

#[async_trait]
impl<T: CacheStorage + ?Sized> CacheStorage for std::sync::Arc<T> {
    async fn open(&self, name: &str) -> Result<()> {
        (**self).open(name).await
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<Response>> {
        (**self).match_in(name, key).await
    }

    async fn match_any(&self, key: &CacheKey) -> Result<Option<Response>> {
        (**self).match_any(key).await
    }

    async fn put(&self, name: &str, key: &CacheKey, response: Response) -> Result<()> {
        (**self).put(name, key, response).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        (**self).keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        (**self).delete(name).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheKey>> {
        (**self).entries(name).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        (**self).has(name).await
    }
}
