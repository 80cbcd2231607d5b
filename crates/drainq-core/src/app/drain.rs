//! DrainLoop - lock, empty the queue into a sink, unlock
//!
//! # Flow
//! 1. `run_with_lock` on the configured lock; if held elsewhere, skip
//! 2. `dequeue()` until it reports the queue empty (or `max_records`)
//! 3. hand each record to the `RecordSink`
//! 4. release the lock, whatever happened in 2-3

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use crate::config::DrainConfig;
use crate::error::Result;
use crate::lock::{Lock, run_with_lock};
use crate::ports::RecordSink;
use crate::queue::Queue;

/// Outcome of one drain that held the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Records handed to the sink.
    pub processed: usize,
    /// Whether the queue read empty when the drain stopped; `false` when it
    /// stopped at `max_records`.
    pub exhausted: bool,
    pub elapsed: Duration,
}

/// Single-consumer drain over a queue, guarded by a lock.
pub struct DrainLoop<T: Send + 'static> {
    queue: Arc<dyn Queue<T>>,
    lock: Arc<dyn Lock>,
    sink: Arc<dyn RecordSink<T>>,
    config: DrainConfig,
}

impl<T: Send + 'static> DrainLoop<T> {
    pub fn new(
        queue: Arc<dyn Queue<T>>,
        lock: Arc<dyn Lock>,
        sink: Arc<dyn RecordSink<T>>,
    ) -> Self {
        Self {
            queue,
            lock,
            sink,
            config: DrainConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DrainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// Drain the queue once.
    ///
    /// `Ok(None)` means another consumer held the lock and nothing was
    /// touched. Any storage, parse or sink error stops the drain; records
    /// processed before it stay processed, and the lock is released.
    #[instrument(level = "info", skip_all, fields(lock = self.lock.key()))]
    pub async fn drain_once(&self) -> Result<Option<DrainReport>> {
        let report = run_with_lock(self.lock.as_ref(), || self.drain_locked()).await?;
        match &report {
            Some(report) => info!(
                processed = report.processed,
                exhausted = report.exhausted,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "drain finished"
            ),
            None => info!("drain skipped, lock held"),
        }
        Ok(report)
    }

    async fn drain_locked(&self) -> Result<DrainReport> {
        let started = Instant::now();
        let mut processed = 0;

        let exhausted = loop {
            if self.config.max_records.is_some_and(|max| processed >= max) {
                break false;
            }
            let Some(record) = self.queue.dequeue().await? else {
                break true;
            };
            self.sink.accept(record).await?;
            processed += 1;
        };

        Ok(DrainReport {
            processed,
            exhausted,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::domain::Params;
    use crate::error::DrainqError;
    use crate::impls::{MemoryCache, MemorySink, MemoryTable};
    use crate::lock::CacheLock;
    use crate::ports::{Cache, SystemClock, TableStore};
    use crate::queue::TableQueue;
    use async_trait::async_trait;

    struct Fixture {
        table: Arc<MemoryTable>,
        queue: Arc<TableQueue>,
        cache: Arc<MemoryCache>,
        lock: Arc<CacheLock>,
        sink: Arc<MemorySink<Params>>,
    }

    fn fixture() -> Fixture {
        let table = Arc::new(MemoryTable::new("t"));
        let queue = Arc::new(TableQueue::new(table.clone()));
        let cache = Arc::new(MemoryCache::new(Arc::new(SystemClock)));
        let lock = Arc::new(CacheLock::new(cache.clone(), &LockConfig::default()));
        Fixture {
            table,
            queue,
            cache,
            lock,
            sink: Arc::new(MemorySink::new()),
        }
    }

    fn params(key: &str, value: &str) -> Params {
        [(key.to_string(), value.to_string())].into_iter().collect()
    }

    fn drain(f: &Fixture) -> DrainLoop<Params> {
        DrainLoop::new(f.queue.clone(), f.lock.clone(), f.sink.clone())
    }

    #[tokio::test]
    async fn drains_everything_in_order() {
        let f = fixture();
        for n in ["1", "2", "3"] {
            f.queue.enqueue(params("n", n)).await.unwrap();
        }

        let report = drain(&f).drain_once().await.unwrap().unwrap();

        assert_eq!(report.processed, 3);
        assert!(report.exhausted);
        assert_eq!(
            f.sink.records(),
            vec![params("n", "1"), params("n", "2"), params("n", "3")]
        );
        assert_eq!(f.queue.size().await.unwrap(), 0);
        assert!(f.lock.holder().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_queue_drains_nothing() {
        let f = fixture();
        let report = drain(&f).drain_once().await.unwrap().unwrap();
        assert_eq!(report.processed, 0);
        assert!(report.exhausted);
    }

    #[tokio::test]
    async fn held_lock_skips_drain() {
        let f = fixture();
        f.queue.enqueue(params("a", "1")).await.unwrap();
        f.cache
            .put("lock", "someone-else", Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(drain(&f).drain_once().await.unwrap(), None);
        assert_eq!(f.queue.size().await.unwrap(), 1);
        assert!(f.sink.is_empty());
    }

    #[tokio::test]
    async fn max_records_leaves_the_rest() {
        let f = fixture();
        for n in ["1", "2", "3"] {
            f.queue.enqueue(params("n", n)).await.unwrap();
        }
        let config = DrainConfig {
            max_records: Some(2),
            ..DrainConfig::default()
        };

        let report = drain(&f).with_config(config).drain_once().await.unwrap().unwrap();

        assert_eq!(report.processed, 2);
        assert!(!report.exhausted);
        assert_eq!(f.queue.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn storage_error_aborts_and_releases() {
        let f = fixture();
        f.queue.enqueue(params("a", "1")).await.unwrap();
        f.table.set_offline(true);

        let err = drain(&f).drain_once().await.unwrap_err();

        assert!(err.is_storage());
        assert!(f.lock.holder().await.unwrap().is_none());
        f.table.set_offline(false);
        assert_eq!(f.table.last_row().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_head_aborts_after_earlier_records() {
        let f = fixture();
        f.queue.enqueue(params("a", "1")).await.unwrap();
        f.table
            .append_row(vec!["{broken".into(), "2024-01-01T00:00:00.000Z".into()])
            .await
            .unwrap();
        f.queue.enqueue(params("a", "3")).await.unwrap();

        let err = drain(&f).drain_once().await.unwrap_err();

        assert!(err.is_malformed());
        assert_eq!(f.sink.records(), vec![params("a", "1")]);
        assert_eq!(f.queue.size().await.unwrap(), 1);
        assert!(f.lock.holder().await.unwrap().is_none());
    }

    struct FailingSink;

    #[async_trait]
    impl RecordSink<Params> for FailingSink {
        async fn accept(&self, _record: Params) -> Result<()> {
            Err(DrainqError::storage("sink", "rejected"))
        }
    }

    #[tokio::test]
    async fn sink_error_aborts_and_record_is_gone() {
        let f = fixture();
        f.queue.enqueue(params("a", "1")).await.unwrap();
        f.queue.enqueue(params("a", "2")).await.unwrap();
        let drain = DrainLoop::new(f.queue.clone(), f.lock.clone(), Arc::new(FailingSink));

        assert!(drain.drain_once().await.is_err());
        assert_eq!(f.queue.size().await.unwrap(), 1);
        assert!(f.lock.holder().await.unwrap().is_none());
    }
}
