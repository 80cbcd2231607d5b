//! Cache port - key-value store with TTL-on-write

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::CacheEntry;
use crate::error::Result;

/// Shared key-value cache. Entries disappear once their TTL has elapsed,
/// whether or not anyone removes them.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Write unconditionally, replacing any entry.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Write only when no live entry exists. Returns whether the write happened.
    ///
    /// Check and write are one atomic step with respect to other callers of
    /// the same cache.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Live entry for `key`; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Remove `key`. Removing an absent key is a no-op.
    async fn remove(&self, key: &str) -> Result<()>;
}
