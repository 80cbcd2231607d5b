//! Table-backed queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{JsonParser, MalformedPolicy, PayloadParser, Queue};
use crate::config::TableTarget;
use crate::domain::{ENQUEUED_AT_COL, HEAD_ROW, PAYLOAD_COL, Params, QueueRecord};
use crate::error::{DrainqError, Result};
use crate::ports::{Catalog, Clock, SystemClock, TableStore};

/// Queue over a `TableStore`: one row per record, payload JSON in column 1,
/// enqueue timestamp in column 2. The head is always row 1.
pub struct TableQueue<T = Params> {
    table: Arc<dyn TableStore>,
    parser: Arc<dyn PayloadParser<T>>,
    on_malformed: MalformedPolicy,
    clock: Arc<dyn Clock>,
}

impl<T> TableQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(table: Arc<dyn TableStore>) -> Self {
        Self {
            table,
            parser: Arc::new(JsonParser::<T>::new()),
            on_malformed: MalformedPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Resolve `target` through `catalog` and bind to it.
    ///
    /// Fails immediately with `Configuration` when the target does not exist.
    pub async fn open(catalog: &dyn Catalog, target: &TableTarget) -> Result<Self> {
        let table = catalog.open(target).await?;
        Ok(Self::new(table))
    }

    pub fn with_parser(mut self, parser: Arc<dyn PayloadParser<T>>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn table(&self) -> &Arc<dyn TableStore> {
        &self.table
    }

    /// The head record as stored, without removing or parsing it.
    pub async fn peek(&self) -> Result<Option<QueueRecord>> {
        let payload = self.table.read_cell(HEAD_ROW, PAYLOAD_COL).await?;
        if payload.is_none() {
            return Ok(None);
        }
        let enqueued_at = self.table.read_cell(HEAD_ROW, ENQUEUED_AT_COL).await?;
        QueueRecord::from_cells(payload, enqueued_at)
            .map(Some)
            .ok_or_else(|| {
                DrainqError::malformed(format!(
                    "{}: head row has no valid timestamp",
                    self.table.name()
                ))
            })
    }

    fn decode(&self, text: &str) -> Result<T> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| DrainqError::malformed(format!("{}: {e}", self.table.name())))?;
        self.parser
            .parse(raw)
            .map_err(|e| DrainqError::malformed(format!("{}: {e}", self.table.name())))
    }
}

#[async_trait]
impl<T> Queue<T> for TableQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn enqueue(&self, payload: T) -> Result<()> {
        let record = QueueRecord::encode(&payload, self.clock.now())?;
        self.table.append_row(record.into_row()).await?;
        debug!(table = self.table.name(), "enqueued record");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<T>> {
        let Some(text) = self.table.read_cell(HEAD_ROW, PAYLOAD_COL).await? else {
            return Ok(None);
        };

        match self.decode(&text) {
            Ok(payload) => {
                self.table.delete_row(HEAD_ROW).await?;
                debug!(table = self.table.name(), "dequeued record");
                Ok(Some(payload))
            }
            Err(err) => {
                if self.on_malformed == MalformedPolicy::Discard {
                    self.table.delete_row(HEAD_ROW).await?;
                    warn!(table = self.table.name(), error = %err, "discarded malformed record");
                } else {
                    warn!(table = self.table.name(), error = %err, "malformed record left at head");
                }
                Err(err)
            }
        }
    }

    async fn is_empty(&self) -> Result<bool> {
        self.table.is_blank(HEAD_ROW, PAYLOAD_COL).await
    }

    async fn size(&self) -> Result<usize> {
        if self.is_empty().await? {
            return Ok(0);
        }
        self.table.last_row().await
    }
}
