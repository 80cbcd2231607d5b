//! Configuration - explicit targets and tunables
//!
//! Nothing here is resolved from ambient state: callers build a `Config`
//! (or load one with `Config::from_env`) and hand it to constructors.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DrainqError, Result};
use crate::lock::AcquireStrategy;
use crate::queue::MalformedPolicy;

pub const ENV_DATA_DIR: &str = "DRAINQ_DATA_DIR";
pub const ENV_BOOK: &str = "DRAINQ_BOOK";
pub const ENV_SHEET: &str = "DRAINQ_SHEET";
pub const ENV_LOCK_KEY: &str = "DRAINQ_LOCK_KEY";
pub const ENV_LOCK_TTL_SECS: &str = "DRAINQ_LOCK_TTL_SECS";
pub const ENV_LOCK_STRATEGY: &str = "DRAINQ_LOCK_STRATEGY";
pub const ENV_TICK_SECS: &str = "DRAINQ_TICK_SECS";
pub const ENV_MAX_RECORDS: &str = "DRAINQ_MAX_RECORDS";
pub const ENV_ON_MALFORMED: &str = "DRAINQ_ON_MALFORMED";

pub const DEFAULT_DATA_DIR: &str = ".drainq";
pub const DEFAULT_BOOK: &str = "default";
pub const DEFAULT_SHEET: &str = "queue";
pub const DEFAULT_LOCK_KEY: &str = "lock";
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Which table the queue binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableTarget {
    pub book: String,
    pub sheet: String,
}

impl TableTarget {
    pub fn new(book: impl Into<String>, sheet: impl Into<String>) -> Self {
        Self {
            book: book.into(),
            sheet: sheet.into(),
        }
    }
}

impl Default for TableTarget {
    fn default() -> Self {
        Self::new(DEFAULT_BOOK, DEFAULT_SHEET)
    }
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.book, self.sheet)
    }
}

/// Lock key, TTL and acquisition strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    pub key: String,
    pub ttl: Duration,
    pub strategy: AcquireStrategy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_LOCK_KEY.to_string(),
            ttl: DEFAULT_LOCK_TTL,
            strategy: AcquireStrategy::default(),
        }
    }
}

/// Drain cadence and failure policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    /// Period between scheduled drains.
    pub tick: Duration,
    /// Stop a drain after this many records; the rest wait for the next tick.
    pub max_records: Option<usize>,
    pub on_malformed: MalformedPolicy,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            max_records: None,
            on_malformed: MalformedPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory for the file-backed table and cache.
    pub data_dir: PathBuf,
    pub table: TableTarget,
    pub lock: LockConfig,
    pub drain: DrainConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            table: TableTarget::default(),
            lock: LockConfig::default(),
            drain: DrainConfig::default(),
        }
    }
}

impl Config {
    /// Load from `DRAINQ_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = non_empty(&lookup, ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(book) = non_empty(&lookup, ENV_BOOK) {
            config.table.book = book;
        }
        if let Some(sheet) = non_empty(&lookup, ENV_SHEET) {
            config.table.sheet = sheet;
        }
        if let Some(key) = non_empty(&lookup, ENV_LOCK_KEY) {
            config.lock.key = key;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_LOCK_TTL_SECS)? {
            config.lock.ttl = Duration::from_secs(secs);
        }
        if let Some(strategy) = parse_var::<AcquireStrategy>(&lookup, ENV_LOCK_STRATEGY)? {
            config.lock.strategy = strategy;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_TICK_SECS)? {
            config.drain.tick = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<usize>(&lookup, ENV_MAX_RECORDS)? {
            config.drain.max_records = Some(max);
        }
        if let Some(policy) = parse_var::<MalformedPolicy>(&lookup, ENV_ON_MALFORMED)? {
            config.drain.on_malformed = policy;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.table.book.is_empty() || self.table.sheet.is_empty() {
            return Err(DrainqError::configuration("table target needs a book and a sheet"));
        }
        if self.lock.key.is_empty() {
            return Err(DrainqError::configuration("lock key must not be empty"));
        }
        if self.lock.ttl.is_zero() {
            return Err(DrainqError::configuration("lock ttl must be positive"));
        }
        if self.drain.tick.is_zero() {
            return Err(DrainqError::configuration("drain tick must be positive"));
        }
        if self.drain.max_records == Some(0) {
            return Err(DrainqError::configuration("max records must be positive"));
        }
        Ok(())
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn parse_var<V>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<V>>
where
    V: FromStr,
    V::Err: fmt::Display,
{
    let Some(raw) = non_empty(lookup, name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| DrainqError::configuration(format!("{name}={raw:?}: {e}")))
}
