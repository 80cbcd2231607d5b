//! FileCache - TTL cache shared between processes through a directory
//!
//! One JSON file per key. `put_if_absent` writes a private temp file and
//! hard-links it into place; the link fails if the key file exists, which
//! gives an atomic create across processes on the same filesystem.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use ulid::Ulid;

use crate::domain::{CacheEntry, expires_at};
use crate::error::{DrainqError, Result};
use crate::ports::{Cache, Clock, SystemClock};

pub struct FileCache {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }

    fn storage_err(&self, key: &str, err: impl std::fmt::Display) -> DrainqError {
        DrainqError::storage(format!("cache key `{key}`"), err)
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DrainqError::storage(self.dir.display().to_string(), e))
    }

    /// Stored entry, live or not.
    async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| self.storage_err(key, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.storage_err(key, e)),
        }
    }

    /// Write `entry` to a uniquely named temp file in the cache directory.
    async fn write_temp(&self, key: &str, entry: &CacheEntry) -> Result<PathBuf> {
        self.ensure_dir().await?;
        let bytes = serde_json::to_vec(entry).map_err(|e| self.storage_err(key, e))?;
        let tmp = self.dir.join(format!(".{}.{}.tmp", file_stem(key), Ulid::new()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| self.storage_err(key, e))?;
        Ok(tmp)
    }

    async fn remove_file(&self, key: &str, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_err(key, e)),
        }
    }
}

#[async_trait]
impl Cache for FileCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(value, expires_at(self.clock.now(), ttl));
        let tmp = self.write_temp(key, &entry).await?;
        tokio::fs::rename(&tmp, self.entry_path(key))
            .await
            .map_err(|e| self.storage_err(key, e))
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let path = self.entry_path(key);

        if let Some(stale) = self.read_entry(key).await? {
            if stale.is_live(now) {
                return Ok(false);
            }
            // Only clear the entry we saw expire. Two callers clearing the
            // same stale entry at once can still both go on to link.
            if self.read_entry(key).await?.as_ref() == Some(&stale) {
                self.remove_file(key, &path).await?;
                debug!(key, "cleared expired entry");
            }
        }

        let entry = CacheEntry::new(value, expires_at(now, ttl));
        let tmp = self.write_temp(key, &entry).await?;
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        self.remove_file(key, &tmp).await?;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(self.storage_err(key, e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = self.clock.now();
        Ok(self.read_entry(key).await?.filter(|entry| entry.is_live(now)))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.remove_file(key, &self.entry_path(key)).await
    }
}

/// Keys map to file names: ASCII alphanumerics, `-` and `_` pass through,
/// every other byte becomes `%XX`.
fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}
