//! TableStore port - append-capable tabular medium
//!
//! Rows and columns are 1-based. Row 1 is always the oldest row still
//! present: deleting a row moves every later row up by one. How that shift
//! is achieved is the implementation's business.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::TableTarget;
use crate::error::Result;

/// One table row, one string per column.
pub type Row = Vec<String>;

/// Addressable table shared between producers and the consumer.
///
/// Appends from concurrent callers are serialized by the store; each gets a
/// distinct position after the current last row.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Display name used in errors and logs (e.g. `book/sheet`).
    fn name(&self) -> &str;

    async fn append_row(&self, columns: Row) -> Result<()>;

    /// `None` when the cell is blank or the row does not exist.
    async fn read_cell(&self, row: usize, col: usize) -> Result<Option<String>>;

    /// Remove `row`, shifting later rows up. Fails if the row does not exist.
    async fn delete_row(&self, row: usize) -> Result<()>;

    /// Index of the last populated row, 0 when empty.
    async fn last_row(&self) -> Result<usize>;

    async fn is_blank(&self, row: usize, col: usize) -> Result<bool> {
        Ok(self.read_cell(row, col).await?.is_none())
    }
}

/// Resolves a configured `(book, sheet)` target to a table.
///
/// Resolution happens once, at construction time; a missing book or sheet is
/// a `Configuration` error naming it.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn open(&self, target: &TableTarget) -> Result<Arc<dyn TableStore>>;
}
