//! RecordSink port - consumer of drained records

use async_trait::async_trait;

use crate::error::Result;

/// Receives each record the drain loop removes from the queue.
///
/// The record is already gone from the store when `accept` runs; an error
/// here aborts the drain and the record is not redelivered.
#[async_trait]
pub trait RecordSink<T: Send + 'static>: Send + Sync {
    async fn accept(&self, record: T) -> Result<()>;
}
