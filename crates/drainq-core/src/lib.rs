//! drainq-core
//!
//! Durable work queue over a shared table, drained by a single consumer
//! under a TTL lock.
//!
//! # Modules
//! - **domain**: queue rows, cache entries, lock markers
//! - **ports**: `TableStore` / `Catalog`, `Cache`, `Clock`, `RecordSink`
//! - **queue**: `Queue` port, `TableQueue`, payload parsers
//! - **lock**: `Lock` port, `CacheLock`, `run_with_lock`
//! - **app**: `DrainLoop`, `TickLoop`, `AppBuilder`
//! - **impls**: in-memory and file-backed media, sinks
//! - **config** / **error**: explicit configuration and the error type

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod lock;
pub mod ports;
pub mod queue;

pub use app::{App, AppBuilder, BuildError, DrainLoop, DrainReport, PeriodicTask, TickLoop};
pub use config::{Config, DrainConfig, LockConfig, TableTarget};
pub use domain::{Params, QueueRecord};
pub use error::{DrainqError, Result};
pub use lock::{AcquireStrategy, CacheLock, Lock, run_with_lock};
pub use queue::{JsonParser, MalformedPolicy, PayloadParser, Queue, TableQueue};
