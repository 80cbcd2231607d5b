//! Ports - abstraction layer
//!
//! Each trait is the seam to a piece of shared infrastructure. The queue and
//! the lock only ever see these traits; in-memory and file-backed
//! implementations live in `impls`.
//!
//! - **TableStore / Catalog**: append-capable tabular medium (the queue's backing store)
//! - **Cache**: key-value store with TTL-on-write (the lock's backing store)
//! - **RecordSink**: where drained records go
//! - **Clock**: time source for expiry decisions

pub mod cache;
pub mod clock;
pub mod sink;
pub mod table_store;

pub use self::cache::Cache;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::sink::RecordSink;
pub use self::table_store::{Catalog, Row, TableStore};
