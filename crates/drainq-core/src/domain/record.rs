//! QueueRecord - one row of the queue table.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{DrainqError, Result};
use crate::ports::Row;

/// The head of the queue is always the first row.
pub const HEAD_ROW: usize = 1;

/// Column holding the serialized payload.
pub const PAYLOAD_COL: usize = 1;

/// Column holding the RFC 3339 enqueue timestamp.
pub const ENQUEUED_AT_COL: usize = 2;

/// Default payload: a flat string-keyed map, as extracted from request parameters.
pub type Params = BTreeMap<String, String>;

/// A record as stored in the table: serialized payload plus enqueue time.
///
/// `enqueued_at` is informational. Ordering comes from row position only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueRecord {
    pub fn new(payload: impl Into<String>, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            payload: payload.into(),
            enqueued_at,
        }
    }

    /// Serialize `payload` as JSON text.
    pub fn encode<T: Serialize>(payload: &T, enqueued_at: DateTime<Utc>) -> Result<Self> {
        let text = serde_json::to_string(payload).map_err(DrainqError::Encode)?;
        Ok(Self::new(text, enqueued_at))
    }

    pub fn into_row(self) -> Row {
        vec![
            self.payload,
            self.enqueued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ]
    }

    /// Rebuild a record from its two cells. A missing or unparsable
    /// timestamp yields `None`; the payload cell must be present.
    pub fn from_cells(payload: Option<String>, enqueued_at: Option<String>) -> Option<Self> {
        let payload = payload?;
        let enqueued_at = enqueued_at
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())?
            .with_timezone(&Utc);
        Some(Self::new(payload, enqueued_at))
    }
}
