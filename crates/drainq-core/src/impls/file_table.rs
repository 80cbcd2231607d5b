//! FileTable / FileCatalog - table medium on the local filesystem
//!
//! Each sheet is a directory `<root>/<book>/<sheet>/` holding:
//! - `rows-<n>.jsonl`: append-only log segments, one JSON array of cells
//!   per line
//! - `index.json`: the segment producers append to, how many lines at the
//!   front of each kept segment are consumed, plus any rows deleted out of
//!   the middle
//!
//! Producers only ever append to the tail segment, so an append never races
//! with the consumer rewriting anything. Deleting rows only rewrites the
//! index, which is replaced atomically (write temp file, rename).
//!
//! # Rotation
//! Once the tail segment holds `segment_rows` lines, the next delete opens a
//! fresh tail. A segment is removed from disk when all of its lines are
//! consumed and the tail has moved at least two segments past it, so an
//! append that read the index just before a rotation still lands in a
//! segment that is read.
//!
//! # Torn lines
//! A final line without its newline is not visible. The next append
//! terminates it first, and a committed line that fails to parse is skipped
//! with a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::TableTarget;
use crate::error::{DrainqError, Result};
use crate::ports::{Catalog, Row, TableStore};

const INDEX_FILE: &str = "index.json";
const SEGMENT_ROWS: usize = 1024;
const APPEND_ATTEMPTS: usize = 3;

/// `(segment, line)` inside the log.
type Pos = (u64, usize);

/// Parsed lines of each kept segment. Consumed and unreadable lines are
/// `None`.
type Log = BTreeMap<u64, Vec<Option<Row>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Index {
    /// Segment producers append to.
    tail: u64,
    /// Kept segments and the number of consumed lines at the front of each.
    heads: BTreeMap<u64, usize>,
    /// Positions past their segment's head that were deleted.
    #[serde(default)]
    deleted: BTreeSet<Pos>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            tail: 0,
            heads: BTreeMap::from([(0, 0)]),
            deleted: BTreeSet::new(),
        }
    }
}

impl Index {
    /// Positions of the live rows, in table order.
    fn live_positions(&self, log: &Log) -> Vec<Pos> {
        let mut live = Vec::new();
        for (&segment, &head) in &self.heads {
            let Some(lines) = log.get(&segment) else {
                continue;
            };
            for line in head..lines.len() {
                if lines[line].is_some() && !self.deleted.contains(&(segment, line)) {
                    live.push((segment, line));
                }
            }
        }
        live
    }

    /// Move each head over deleted and unreadable lines, then drop used-up
    /// segments at least two behind the tail. Returns the dropped segments.
    fn normalize(&mut self, log: &Log) -> Vec<u64> {
        for (&segment, head) in self.heads.iter_mut() {
            let lines = log.get(&segment).map(Vec::as_slice).unwrap_or_default();
            while *head < lines.len()
                && (lines[*head].is_none() || self.deleted.remove(&(segment, *head)))
            {
                *head += 1;
            }
        }

        let mut dropped = Vec::new();
        while let Some((&segment, &head)) = self.heads.first_key_value() {
            let len = log.get(&segment).map_or(0, Vec::len);
            if head < len || segment + 1 >= self.tail {
                break;
            }
            self.heads.remove(&segment);
            dropped.push(segment);
        }

        let heads = &self.heads;
        self.deleted
            .retain(|(segment, line)| heads.get(segment).is_some_and(|&head| *line >= head));
        dropped
    }
}

/// Table stored under one sheet directory.
///
/// Appends may come from any number of handles and processes. Deletes
/// read-modify-write the index and must come from one caller at a time,
/// which the drain lock guarantees.
pub struct FileTable {
    name: String,
    dir: PathBuf,
    segment_rows: usize,
}

impl FileTable {
    fn new(name: String, dir: PathBuf) -> Self {
        Self {
            name,
            dir,
            segment_rows: SEGMENT_ROWS,
        }
    }

    #[cfg(test)]
    fn with_segment_rows(mut self, rows: usize) -> Self {
        self.segment_rows = rows;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn segment_path(&self, segment: u64) -> PathBuf {
        self.dir.join(format!("rows-{segment}.jsonl"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn storage_err(&self, err: impl std::fmt::Display) -> DrainqError {
        DrainqError::storage(&self.name, err)
    }

    /// Create the tail segment if it does not exist yet.
    async fn ensure_tail(&self) -> Result<()> {
        let tail = self.read_index().await?.tail;
        self.touch_segment(tail).await
    }

    async fn touch_segment(&self, segment: u64) -> Result<()> {
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.segment_path(segment))
            .await
            .map(drop)
            .map_err(|e| self.storage_err(e))
    }

    /// Committed lines of one segment. Lines before `from` are not parsed.
    async fn read_segment(&self, segment: u64, from: usize) -> Result<Vec<Option<Row>>> {
        let text = match tokio::fs::read_to_string(self.segment_path(segment)).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.storage_err(e)),
        };

        let Some(end) = text.rfind('\n') else {
            return Ok(Vec::new());
        };
        let lines = text[..end]
            .split('\n')
            .enumerate()
            .map(|(line, raw)| {
                if line < from || raw.trim().is_empty() {
                    return None;
                }
                match serde_json::from_str::<Row>(raw) {
                    Ok(row) => Some(row),
                    Err(err) => {
                        warn!(
                            table = %self.name,
                            segment,
                            line = line + 1,
                            error = %err,
                            "skipping unreadable row"
                        );
                        None
                    }
                }
            })
            .collect();
        Ok(lines)
    }

    async fn read_index(&self) -> Result<Index> {
        match tokio::fs::read(self.index_path()).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| self.storage_err(format!("{INDEX_FILE}: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Index::default()),
            Err(e) => Err(self.storage_err(e)),
        }
    }

    async fn write_index(&self, index: &Index) -> Result<()> {
        let bytes = serde_json::to_vec(index).map_err(|e| self.storage_err(e))?;
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| self.storage_err(e))?;
        tokio::fs::rename(&tmp, self.index_path())
            .await
            .map_err(|e| self.storage_err(e))
    }

    async fn load(&self) -> Result<(Index, Log)> {
        let index = self.read_index().await?;
        let mut log = Log::new();
        for (&segment, &head) in &index.heads {
            log.insert(segment, self.read_segment(segment, head).await?);
        }
        Ok((index, log))
    }

    async fn live_rows(&self) -> Result<Vec<Row>> {
        let (index, mut log) = self.load().await?;
        Ok(index
            .live_positions(&log)
            .into_iter()
            .filter_map(|(segment, line)| log.get_mut(&segment).and_then(|l| l[line].take()))
            .collect())
    }
}

/// Whether the file is empty or its last byte is a newline.
async fn ends_with_newline(file: &mut tokio::fs::File) -> std::io::Result<bool> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

#[async_trait]
impl TableStore for FileTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append_row(&self, columns: Row) -> Result<()> {
        let line = serde_json::to_string(&columns).map_err(|e| self.storage_err(e))?;

        for _ in 0..APPEND_ATTEMPTS {
            let tail = self.read_index().await?.tail;
            // A dropped segment is never recreated here.
            let mut file = match tokio::fs::OpenOptions::new()
                .read(true)
                .append(true)
                .open(self.segment_path(tail))
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(self.storage_err(e)),
            };

            let mut buf = String::with_capacity(line.len() + 2);
            if !ends_with_newline(&mut file)
                .await
                .map_err(|e| self.storage_err(e))?
            {
                warn!(table = %self.name, segment = tail, "terminating torn row");
                buf.push('\n');
            }
            buf.push_str(&line);
            buf.push('\n');

            // One write per line on an O_APPEND handle keeps concurrent
            // producers from interleaving.
            file.write_all(buf.as_bytes())
                .await
                .map_err(|e| self.storage_err(e))?;
            return file.flush().await.map_err(|e| self.storage_err(e));
        }

        Err(self.storage_err("tail segment is missing"))
    }

    async fn read_cell(&self, row: usize, col: usize) -> Result<Option<String>> {
        if row == 0 || col == 0 {
            return Ok(None);
        }
        let rows = self.live_rows().await?;
        Ok(rows
            .get(row - 1)
            .and_then(|cells| cells.get(col - 1))
            .filter(|value| !value.is_empty())
            .cloned())
    }

    async fn delete_row(&self, row: usize) -> Result<()> {
        let (mut index, log) = self.load().await?;
        let positions = index.live_positions(&log);

        let Some(&pos) = row.checked_sub(1).and_then(|i| positions.get(i)) else {
            return Err(self.storage_err(format!("row {row} does not exist")));
        };
        index.deleted.insert(pos);

        let tail_len = log.get(&index.tail).map_or(0, Vec::len);
        if tail_len >= self.segment_rows {
            let next = index.tail + 1;
            self.touch_segment(next).await?;
            index.tail = next;
            index.heads.insert(next, 0);
            info!(table = %self.name, segment = next, "rotated to new segment");
        }

        let dropped = index.normalize(&log);
        self.write_index(&index).await?;
        for segment in dropped {
            match tokio::fs::remove_file(self.segment_path(segment)).await {
                Ok(()) => debug!(table = %self.name, segment, "removed consumed segment"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(self.storage_err(e)),
            }
        }

        debug!(table = %self.name, row, segment = pos.0, line = pos.1, "deleted row");
        Ok(())
    }

    async fn last_row(&self) -> Result<usize> {
        let (index, log) = self.load().await?;
        Ok(index.live_positions(&log).len())
    }
}

/// Workbooks as directories under `root`, sheets as subdirectories.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    root: PathBuf,
}

impl FileCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sheet_dir(&self, target: &TableTarget) -> PathBuf {
        self.root.join(&target.book).join(&target.sheet)
    }

    /// Create the sheet (and its workbook) if missing.
    pub async fn create(&self, target: &TableTarget) -> Result<Arc<FileTable>> {
        validate_segment(&target.book)?;
        validate_segment(&target.sheet)?;
        let dir = self.sheet_dir(target);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DrainqError::storage(target.to_string(), e))?;
        let table = FileTable::new(target.to_string(), dir);
        table.ensure_tail().await?;
        Ok(Arc::new(table))
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn open(&self, target: &TableTarget) -> Result<Arc<dyn TableStore>> {
        validate_segment(&target.book)?;
        validate_segment(&target.sheet)?;

        let book_dir = self.root.join(&target.book);
        if !is_dir(&book_dir).await {
            return Err(DrainqError::configuration(format!(
                "workbook `{}` not found under {}",
                target.book,
                self.root.display()
            )));
        }
        let dir = self.sheet_dir(target);
        if !is_dir(&dir).await {
            return Err(DrainqError::configuration(format!(
                "sheet `{}` not found in workbook `{}`",
                target.sheet, target.book
            )));
        }
        let table = FileTable::new(target.to_string(), dir);
        table.ensure_tail().await?;
        Ok(Arc::new(table))
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Book and sheet names become path segments.
fn validate_segment(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if ok {
        Ok(())
    } else {
        Err(DrainqError::configuration(format!(
            "`{name}` is not a valid book or sheet name"
        )))
    }
}
