//! Impls - port implementations
//!
//! - **Memory\***: in-process table, catalog and cache, for tests and
//!   single-process embedding
//! - **File\***: directory-backed table, catalog and cache, shared between
//!   processes on one host
//! - **LogSink / MemorySink**: record consumers

pub mod file_cache;
pub mod file_table;
pub mod memory_cache;
pub mod memory_table;
pub mod sink;

pub use self::file_cache::FileCache;
pub use self::file_table::{FileCatalog, FileTable};
pub use self::memory_cache::MemoryCache;
pub use self::memory_table::{MemoryCatalog, MemoryTable};
pub use self::sink::{LogSink, MemorySink};
