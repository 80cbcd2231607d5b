//! MemoryTable / MemoryCatalog - in-process table medium
//!
//! Rows live in an arena with a movable head index, so deleting row 1 is
//! O(1). The dead prefix is compacted once it outweighs the live rows.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::config::TableTarget;
use crate::error::{DrainqError, Result};
use crate::ports::{Catalog, Row, TableStore};

const COMPACT_MIN_HEAD: usize = 64;

#[derive(Debug, Default)]
struct Arena {
    rows: Vec<Row>,
    /// Arena index of table row 1.
    head: usize,
}

impl Arena {
    fn live(&self) -> usize {
        self.rows.len() - self.head
    }

    /// Arena index for a 1-based table row, if the row exists.
    fn index_of(&self, row: usize) -> Option<usize> {
        (row >= 1 && row <= self.live()).then(|| self.head + row - 1)
    }

    fn compact(&mut self) {
        if self.head >= COMPACT_MIN_HEAD && self.head * 2 >= self.rows.len() {
            self.rows.drain(..self.head);
            self.head = 0;
        }
    }
}

/// Table held in memory. Cloning the `Arc` shares the table.
#[derive(Debug)]
pub struct MemoryTable {
    name: String,
    state: Mutex<Arena>,
    offline: AtomicBool,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(Arena::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with a storage error, as if the medium
    /// were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Snapshot of the live rows, head first.
    pub fn rows(&self) -> Vec<Row> {
        let state = self.state.lock();
        state.rows[state.head..].to_vec()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DrainqError::storage(&self.name, "table is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append_row(&self, columns: Row) -> Result<()> {
        self.check_online()?;
        self.state.lock().rows.push(columns);
        Ok(())
    }

    async fn read_cell(&self, row: usize, col: usize) -> Result<Option<String>> {
        self.check_online()?;
        if col == 0 {
            return Ok(None);
        }
        let state = self.state.lock();
        let cell = state
            .index_of(row)
            .and_then(|idx| state.rows[idx].get(col - 1))
            .filter(|value| !value.is_empty())
            .cloned();
        Ok(cell)
    }

    async fn delete_row(&self, row: usize) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.lock();
        let Some(idx) = state.index_of(row) else {
            return Err(DrainqError::storage(
                &self.name,
                format!("row {row} does not exist"),
            ));
        };

        if idx == state.head {
            state.rows[idx] = Row::new();
            state.head += 1;
            state.compact();
        } else {
            state.rows.remove(idx);
        }
        Ok(())
    }

    async fn last_row(&self) -> Result<usize> {
        self.check_online()?;
        Ok(self.state.lock().live())
    }
}

/// In-memory set of workbooks, each holding named sheets.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    books: RwLock<HashMap<String, HashMap<String, Arc<MemoryTable>>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `book/sheet` (and the book, if needed). Returns the existing
    /// table when the sheet is already present.
    pub fn add_sheet(&self, book: &str, sheet: &str) -> Arc<MemoryTable> {
        let mut books = self.books.write();
        books
            .entry(book.to_string())
            .or_default()
            .entry(sheet.to_string())
            .or_insert_with(|| Arc::new(MemoryTable::new(format!("{book}/{sheet}"))))
            .clone()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn open(&self, target: &TableTarget) -> Result<Arc<dyn TableStore>> {
        let books = self.books.read();
        let Some(sheets) = books.get(&target.book) else {
            return Err(DrainqError::configuration(format!(
                "workbook `{}` not found",
                target.book
            )));
        };
        let Some(table) = sheets.get(&target.sheet) else {
            return Err(DrainqError::configuration(format!(
                "sheet `{}` not found in workbook `{}`",
                target.sheet, target.book
            )));
        };
        Ok(table.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn row(payload: &str) -> Row {
        vec![payload.to_string(), "2024-01-01T00:00:00.000Z".to_string()]
    }

    async fn table_with(n: usize) -> MemoryTable {
        let table = MemoryTable::new("t");
        for i in 1..=n {
            table.append_row(row(&i.to_string())).await.unwrap();
        }
        table
    }

    #[tokio::test]
    async fn empty_table_reads_blank() {
        let table = MemoryTable::new("t");
        assert_eq!(table.last_row().await.unwrap(), 0);
        assert!(table.is_blank(1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_head_shifts_rows_up() {
        let table = table_with(3).await;

        table.delete_row(1).await.unwrap();

        assert_eq!(table.last_row().await.unwrap(), 2);
        assert_eq!(table.read_cell(1, 1).await.unwrap().as_deref(), Some("2"));
        assert_eq!(table.read_cell(2, 1).await.unwrap().as_deref(), Some("3"));
        assert_eq!(table.read_cell(3, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleting_middle_row_keeps_order() {
        let table = table_with(3).await;

        table.delete_row(2).await.unwrap();

        let payloads: Vec<String> = table.rows().into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(payloads, vec!["1", "3"]);
    }

    #[rstest]
    #[case::row_zero(0)]
    #[case::past_end(3)]
    #[tokio::test]
    async fn deleting_missing_row_fails(#[case] row_idx: usize) {
        let table = table_with(2).await;
        assert!(table.delete_row(row_idx).await.unwrap_err().is_storage());
        assert_eq!(table.last_row().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn head_deletes_compact_the_arena() {
        let table = table_with(200).await;

        for _ in 0..150 {
            table.delete_row(1).await.unwrap();
        }

        assert_eq!(table.last_row().await.unwrap(), 50);
        assert_eq!(table.read_cell(1, 1).await.unwrap().as_deref(), Some("151"));
        assert!(table.state.lock().head < COMPACT_MIN_HEAD);
    }

    #[tokio::test]
    async fn appends_after_drain_land_at_row_one() {
        let table = table_with(1).await;
        table.delete_row(1).await.unwrap();

        table.append_row(row("next")).await.unwrap();

        assert_eq!(table.read_cell(1, 1).await.unwrap().as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn offline_table_fails_every_operation() {
        let table = table_with(1).await;
        table.set_offline(true);

        assert!(table.append_row(row("x")).await.unwrap_err().is_storage());
        assert!(table.read_cell(1, 1).await.unwrap_err().is_storage());
        assert!(table.delete_row(1).await.unwrap_err().is_storage());
        assert!(table.last_row().await.unwrap_err().is_storage());

        table.set_offline(false);
        assert_eq!(table.last_row().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn catalog_distinguishes_missing_book_and_sheet() {
        let catalog = MemoryCatalog::new();
        catalog.add_sheet("default", "queue");

        let missing_book = catalog
            .open(&TableTarget::new("nope", "queue"))
            .await
            .err()
            .unwrap();
        let missing_sheet = catalog
            .open(&TableTarget::new("default", "nope"))
            .await
            .err()
            .unwrap();

        assert!(missing_book.to_string().contains("workbook `nope` not found"));
        assert!(missing_sheet.to_string().contains("sheet `nope` not found"));
        assert!(catalog.open(&TableTarget::default()).await.is_ok());
    }

    #[tokio::test]
    async fn catalog_shares_the_same_table() {
        let catalog = MemoryCatalog::new();
        let table = catalog.add_sheet("default", "queue");
        table.append_row(row("1")).await.unwrap();

        let opened = catalog.open(&TableTarget::default()).await.unwrap();

        assert_eq!(opened.last_row().await.unwrap(), 1);
        assert_eq!(opened.name(), "default/queue");
    }
}
