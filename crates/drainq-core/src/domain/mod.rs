//! Domain model (records, lock markers).
//!
//! - **record**: `QueueRecord` and the default `Params` payload
//! - **lock**: `LockRecord`, `CacheEntry`, `LockToken`

pub mod lock;
pub mod record;

pub use self::lock::{CacheEntry, LockRecord, LockToken, expires_at};
pub use self::record::{Params, QueueRecord, ENQUEUED_AT_COL, HEAD_ROW, PAYLOAD_COL};
