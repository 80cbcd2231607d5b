//! AppBuilder - wiring and startup validation
//!
//! # Fail-fast
//! `build()` validates the config, checks every required port was supplied,
//! and resolves the table target. A wrong book or sheet name fails here,
//! not on the first enqueue.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{DrainLoop, TickLoop};
use crate::config::Config;
use crate::domain::Params;
use crate::error::DrainqError;
use crate::impls::{FileCache, FileCatalog, LogSink};
use crate::lock::CacheLock;
use crate::ports::{Cache, Catalog, Clock, RecordSink, SystemClock};
use crate::queue::{PayloadParser, TableQueue};

pub const TABLES_DIR: &str = "tables";
pub const CACHE_DIR: &str = "cache";

/// Errors raised while assembling an `App`.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no table catalog configured")]
    MissingCatalog,

    #[error("no cache configured for the lock")]
    MissingCache,

    #[error("could not resolve components: {0}")]
    Resolve(#[from] DrainqError),
}

/// Builds an `App` from a `Config` plus the media to run on.
///
/// ```ignore
/// let app = AppBuilder::<Params>::new(Config::from_env()?)
///     .with_file_media()
///     .build()
///     .await?;
/// app.drain.drain_once().await?;
/// ```
pub struct AppBuilder<T: Send + 'static = Params> {
    config: Config,
    catalog: Option<Arc<dyn Catalog>>,
    cache: Option<Arc<dyn Cache>>,
    sink: Option<Arc<dyn RecordSink<T>>>,
    parser: Option<Arc<dyn PayloadParser<T>>>,
    clock: Arc<dyn Clock>,
}

impl<T> AppBuilder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(config: Config) -> Self {
        Self {
            config,
            catalog: None,
            cache: None,
            sink: None,
            parser: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Defaults to `LogSink`.
    pub fn sink(mut self, sink: Arc<dyn RecordSink<T>>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Defaults to plain JSON deserialization into `T`.
    pub fn parser(mut self, parser: Arc<dyn PayloadParser<T>>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use the directory-backed table and cache under `config.data_dir`.
    pub fn with_file_media(self) -> Self {
        let (catalog, cache) = file_media(&self.config.data_dir, self.clock.clone());
        self.catalog(Arc::new(catalog)).cache(Arc::new(cache))
    }

    pub async fn build(self) -> Result<App<T>, BuildError> {
        self.config.validate()?;
        let catalog = self.catalog.ok_or(BuildError::MissingCatalog)?;
        let cache = self.cache.ok_or(BuildError::MissingCache)?;

        let mut queue = TableQueue::<T>::open(catalog.as_ref(), &self.config.table)
            .await?
            .with_malformed_policy(self.config.drain.on_malformed)
            .with_clock(self.clock.clone());
        if let Some(parser) = self.parser {
            queue = queue.with_parser(parser);
        }
        let queue = Arc::new(queue);

        let lock = Arc::new(CacheLock::new(cache, &self.config.lock).with_clock(self.clock));
        let sink: Arc<dyn RecordSink<T>> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(LogSink::<T>::new()),
        };
        let drain = Arc::new(
            DrainLoop::new(queue.clone(), lock.clone(), sink)
                .with_config(self.config.drain.clone()),
        );

        Ok(App {
            config: self.config,
            queue,
            lock,
            drain,
        })
    }
}

/// The file-backed catalog and cache rooted at `data_dir`.
pub fn file_media(data_dir: &Path, clock: Arc<dyn Clock>) -> (FileCatalog, FileCache) {
    let catalog = FileCatalog::new(data_dir.join(TABLES_DIR));
    let cache = FileCache::new(data_dir.join(CACHE_DIR)).with_clock(clock);
    (catalog, cache)
}

/// Wired components sharing one table and one lock.
pub struct App<T: Send + 'static = Params> {
    pub config: Config,
    pub queue: Arc<TableQueue<T>>,
    pub lock: Arc<CacheLock>,
    pub drain: Arc<DrainLoop<T>>,
}

impl<T: Send + 'static> App<T> {
    /// Start draining on `config.drain.tick`.
    pub fn schedule(&self) -> TickLoop {
        TickLoop::spawn(self.drain.clone(), self.config.drain.tick)
    }
}
