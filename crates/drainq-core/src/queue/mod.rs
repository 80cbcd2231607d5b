//! Queue module: the queue port, payload parsers, and the table-backed queue.

mod parser;
mod table;

pub use parser::{JsonParser, MalformedPolicy, PayloadParser};
pub use table::TableQueue;

use async_trait::async_trait;

use crate::error::Result;

/// Queue port (interface).
///
/// FIFO over the backing store's positions. `is_empty` followed by `dequeue`
/// is two separate reads; only `dequeue` returning `None` reliably says the
/// queue was empty at that moment.
#[async_trait]
pub trait Queue<T: Send + 'static>: Send + Sync {
    /// Append `payload` after the current last record.
    async fn enqueue(&self, payload: T) -> Result<()>;

    /// Remove and return the head record, or `None` when the queue is empty.
    async fn dequeue(&self) -> Result<Option<T>>;

    /// True when the head position holds no record.
    async fn is_empty(&self) -> Result<bool>;

    /// Number of records currently present.
    async fn size(&self) -> Result<usize>;
}
