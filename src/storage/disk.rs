//! File-backed cache storage.
//!
//! Layout: one directory per partition under the root; each entry is a
//! `<sha256>.toml` metadata file plus a `<sha256>.body` file. The metadata
//! file is renamed into place last, so an entry is visible only once its
//! body is complete, and it records the body's digest so a body from a
//! different write is never paired with it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::request::{CacheKey, Response};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    url: String,
    stored_at: DateTime<Utc>,
    /// SHA-256 of the body file this metadata was written with.
    body_sha256: String,
    headers: Vec<(String, String)>,
}

/// Partitions persisted under a root directory, enumerated in name order.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Creates storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of all partitions.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return Err(Error::Storage(format!("invalid partition name: {name:?}")));
        }
        Ok(self.root.join(name))
    }

    fn entry_stem(key: &CacheKey) -> String {
        hex_sha256(key.as_str().as_bytes())
    }

    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => toml::from_str(&contents)
                .map(Some)
                .map_err(|e| Error::Storage(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.partition_dir(name)?).await?;
        Ok(())
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<Response>> {
        let dir = self.partition_dir(name)?;
        let stem = Self::entry_stem(key);
        let Some(meta) = Self::read_meta(&dir.join(format!("{stem}.toml"))).await? else {
            return Ok(None);
        };
        if meta.key != key.as_str() {
            log::warn!("Cache entry hash collision in {name} for {key}");
            return Ok(None);
        }
        let body = match tokio::fs::read(dir.join(format!("{stem}.body"))).await {
            Ok(body) => body,
            // Partition deleted between the two reads.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if hex_sha256(&body) != meta.body_sha256 {
            // Concurrent writers of one key interleaved their renames.
            log::warn!("Cache entry {key} in {name} has a mismatched body, ignoring");
            return Ok(None);
        }
        Ok(Some(Response {
            status: meta.status,
            headers: meta.headers,
            body: Bytes::from(body),
            url: meta.url,
        }))
    }

    async fn put(&self, name: &str, key: &CacheKey, response: Response) -> Result<()> {
        let dir = self.partition_dir(name)?;
        tokio::fs::create_dir_all(&dir).await?;

        let stem = Self::entry_stem(key);
        let meta = EntryMeta {
            key: key.as_str().to_string(),
            status: response.status,
            url: response.url,
            stored_at: Utc::now(),
            body_sha256: hex_sha256(&response.body),
            headers: response.headers,
        };
        let meta_str = toml::to_string(&meta).map_err(|e| Error::Storage(e.to_string()))?;

        let body_path = dir.join(format!("{stem}.body"));
        let meta_path = dir.join(format!("{stem}.toml"));
        // Unique temp names so concurrent writers of one key never share a file.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let body_tmp = dir.join(format!("{stem}.body.{seq}.tmp"));
        let meta_tmp = dir.join(format!("{stem}.toml.{seq}.tmp"));

        tokio::fs::write(&body_tmp, &response.body).await?;
        tokio::fs::write(&meta_tmp, meta_str).await?;
        tokio::fs::rename(&body_tmp, &body_path).await?;
        tokio::fs::rename(&meta_tmp, &meta_path).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let file_name = entry.file_name();
            if entry.file_type().await?.is_dir()
                && let Some(name) = file_name.to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.partition_dir(name)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheKey>> {
        let dir = self.partition_dir(name)?;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "toml")
                && let Some(meta) = Self::read_meta(&path).await?
            {
                keys.push(CacheKey::from_raw(meta.key));
            }
        }
        keys.sort();
        Ok(keys)
    }
}
