//! CacheLock - exclusive lock stored as a TTL'd cache entry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{AcquireStrategy, Lock};
use crate::config::LockConfig;
use crate::domain::{LockRecord, LockToken};
use crate::error::Result;
use crate::ports::{Cache, Clock, SystemClock};

/// Lock held while a live cache entry exists under `key`.
///
/// The entry is written with the configured TTL, so a holder that dies
/// without unlocking frees the lock once the TTL elapses. A holder whose work
/// outlives the TTL can be joined by a second holder.
///
/// `unlock` only removes the entry this instance wrote. Once the TTL has
/// passed and someone else holds the key, a late `unlock` leaves it alone.
pub struct CacheLock {
    cache: Arc<dyn Cache>,
    key: String,
    ttl: Duration,
    strategy: AcquireStrategy,
    clock: Arc<dyn Clock>,
    /// Marker written by the last successful `lock()`.
    held: Mutex<Option<String>>,
}

impl CacheLock {
    pub fn new(cache: Arc<dyn Cache>, config: &LockConfig) -> Self {
        Self {
            cache,
            key: config.key.clone(),
            ttl: config.ttl,
            strategy: config.strategy,
            clock: Arc::new(SystemClock),
            held: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn strategy(&self) -> AcquireStrategy {
        self.strategy
    }

    /// Current holder, if the lock is held.
    pub async fn holder(&self) -> Result<Option<LockRecord>> {
        let entry = self.cache.get(&self.key).await?;
        Ok(entry.map(|entry| LockRecord::from_entry(&self.key, entry)))
    }

    /// Remove the entry whoever holds it.
    pub async fn force_unlock(&self) -> Result<()> {
        self.cache.remove(&self.key).await?;
        self.held.lock().take();
        info!(key = %self.key, "lock removed");
        Ok(())
    }
}

#[async_trait]
impl Lock for CacheLock {
    fn key(&self) -> &str {
        &self.key
    }

    async fn lock(&self) -> Result<bool> {
        let marker = LockToken::generate(self.clock.as_ref()).to_string();

        let acquired = match self.strategy {
            AcquireStrategy::CheckThenPut => {
                if self.cache.get(&self.key).await?.is_some() {
                    false
                } else {
                    self.cache.put(&self.key, &marker, self.ttl).await?;
                    true
                }
            }
            AcquireStrategy::PutIfAbsent => {
                self.cache.put_if_absent(&self.key, &marker, self.ttl).await?
            }
        };

        if acquired {
            *self.held.lock() = Some(marker.clone());
            info!(
                key = %self.key,
                marker = %marker,
                ttl_secs = self.ttl.as_secs(),
                "lock acquired"
            );
        } else {
            debug!(key = %self.key, "lock already held");
        }
        Ok(acquired)
    }

    async fn unlock(&self) -> Result<()> {
        let Some(marker) = self.held.lock().clone() else {
            debug!(key = %self.key, "not held here, nothing to release");
            return Ok(());
        };

        match self.cache.get(&self.key).await? {
            Some(entry) if entry.value == marker => {
                self.cache.remove(&self.key).await?;
                info!(key = %self.key, "lock released");
            }
            Some(entry) => {
                warn!(key = %self.key, holder = %entry.value, "lock expired and was taken over");
            }
            None => debug!(key = %self.key, "lock already expired"),
        }
        self.held.lock().take();
        Ok(())
    }
}
