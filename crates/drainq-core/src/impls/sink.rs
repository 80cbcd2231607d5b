//! Record sinks: log every record, or collect them for inspection.

use std::marker::PhantomData;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::error::{DrainqError, Result};
use crate::ports::RecordSink;

/// Writes each record to the log as one JSON line.
pub struct LogSink<T> {
    _marker: PhantomData<fn(T)>,
}

impl<T> LogSink<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for LogSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> RecordSink<T> for LogSink<T>
where
    T: Serialize + Send + 'static,
{
    async fn accept(&self, record: T) -> Result<()> {
        let payload = serde_json::to_string(&record).map_err(DrainqError::Encode)?;
        info!(target: "drainq::record", %payload, "record drained");
        Ok(())
    }
}

/// Keeps every record in memory, in arrival order.
#[derive(Debug)]
pub struct MemorySink<T> {
    records: Mutex<Vec<T>>,
}

impl<T> MemorySink<T> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.records.lock())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> MemorySink<T> {
    pub fn records(&self) -> Vec<T> {
        self.records.lock().clone()
    }
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> RecordSink<T> for MemorySink<T>
where
    T: Send + 'static,
{
    async fn accept(&self, record: T) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}
