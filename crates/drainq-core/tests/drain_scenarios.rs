//! End-to-end drain scenarios over the in-memory media.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use drainq_core::impls::{MemoryCache, MemoryCatalog, MemorySink, MemoryTable};
use drainq_core::ports::{Clock, FixedClock, RecordSink, TableStore};
use drainq_core::{
    AcquireStrategy, App, AppBuilder, CacheLock, Config, DrainConfig, Lock, LockConfig, Params,
    Queue, Result, TableTarget,
};
use rstest::rstest;
use tokio::sync::Notify;

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

struct Harness {
    table: Arc<MemoryTable>,
    cache: Arc<MemoryCache>,
    clock: Arc<FixedClock>,
    sink: Arc<MemorySink<Params>>,
    app: App<Params>,
}

async fn harness(config: Config) -> Harness {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let catalog = Arc::new(MemoryCatalog::new());
    let table = catalog.add_sheet(&config.table.book, &config.table.sheet);
    let cache = Arc::new(MemoryCache::new(clock.clone()));
    let sink = Arc::new(MemorySink::<Params>::new());

    let app = AppBuilder::<Params>::new(config)
        .catalog(catalog)
        .cache(cache.clone())
        .sink(sink.clone())
        .clock(clock.clone())
        .build()
        .await
        .unwrap();

    Harness {
        table,
        cache,
        clock,
        sink,
        app,
    }
}

#[tokio::test]
async fn drain_processes_records_in_order_and_frees_the_lock() {
    let h = harness(Config::default()).await;
    h.app.queue.enqueue(params(&[("a", "1")])).await.unwrap();
    h.app.queue.enqueue(params(&[("a", "2")])).await.unwrap();

    let report = h.app.drain.drain_once().await.unwrap().unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(
        h.sink.records(),
        vec![params(&[("a", "1")]), params(&[("a", "2")])]
    );
    assert!(h.app.queue.is_empty().await.unwrap());
    assert!(h.app.lock.holder().await.unwrap().is_none());
}

#[tokio::test]
async fn second_consumer_skips_while_first_holds_the_lock() {
    let h = harness(Config::default()).await;
    h.app.queue.enqueue(params(&[("a", "1")])).await.unwrap();

    let other = CacheLock::new(h.cache.clone(), &LockConfig::default()).with_clock(h.clock.clone());
    assert!(other.lock().await.unwrap());

    assert_eq!(h.app.drain.drain_once().await.unwrap(), None);
    assert_eq!(h.app.queue.size().await.unwrap(), 1);

    other.unlock().await.unwrap();
    let report = h.app.drain.drain_once().await.unwrap().unwrap();
    assert_eq!(report.processed, 1);
}

/// Parks inside the first `accept` until released.
struct GatedSink {
    inner: MemorySink<Params>,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedSink {
    fn new() -> Self {
        Self {
            inner: MemorySink::new(),
            gated: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl RecordSink<Params> for GatedSink {
    async fn accept(&self, record: Params) -> Result<()> {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.accept(record).await
    }
}

#[tokio::test]
async fn drain_in_progress_turns_away_a_second_consumer() {
    let h = harness(Config::default()).await;
    let catalog = Arc::new(MemoryCatalog::new());
    let table = catalog.add_sheet("default", "queue");
    let sink = Arc::new(GatedSink::new());
    let build = |sink: Arc<dyn RecordSink<Params>>| {
        AppBuilder::<Params>::new(Config::default())
            .catalog(catalog.clone())
            .cache(h.cache.clone())
            .sink(sink)
            .clock(h.clock.clone())
            .build()
    };
    let first = build(sink.clone()).await.unwrap();
    let second = build(Arc::new(MemorySink::<Params>::new())).await.unwrap();
    first.queue.enqueue(params(&[("a", "1")])).await.unwrap();
    first.queue.enqueue(params(&[("a", "2")])).await.unwrap();

    let running = tokio::spawn({
        let drain = first.drain.clone();
        async move { drain.drain_once().await }
    });
    sink.entered.notified().await;

    assert_eq!(second.drain.drain_once().await.unwrap(), None);
    assert_eq!(second.queue.size().await.unwrap(), 1);
    assert_eq!(table.last_row().await.unwrap(), 1);

    sink.release.notify_one();
    let report = running.await.unwrap().unwrap().unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(
        sink.inner.records(),
        vec![params(&[("a", "1")]), params(&[("a", "2")])]
    );
    assert!(second.lock.holder().await.unwrap().is_none());
}

#[tokio::test]
async fn crashed_holder_is_recovered_after_ttl() {
    let h = harness(Config::default()).await;
    h.app.queue.enqueue(params(&[("a", "1")])).await.unwrap();

    let crashed =
        CacheLock::new(h.cache.clone(), &LockConfig::default()).with_clock(h.clock.clone());
    assert!(crashed.lock().await.unwrap());
    drop(crashed);

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.app.drain.drain_once().await.unwrap(), None);

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.app.drain.drain_once().await.unwrap().unwrap().processed, 1);
}

#[tokio::test]
async fn storage_failure_mid_drain_releases_the_lock() {
    let h = harness(Config::default()).await;
    h.app.queue.enqueue(params(&[("a", "1")])).await.unwrap();
    h.table.set_offline(true);

    let err = h.app.drain.drain_once().await.unwrap_err();

    assert!(err.is_storage());
    assert!(h.app.lock.lock().await.unwrap());
}

#[tokio::test]
async fn malformed_record_is_reported_and_later_records_survive() {
    let h = harness(Config::default()).await;
    h.table
        .append_row(vec![r#"{"a":1}"#.into(), h.clock.now().to_rfc3339()])
        .await
        .unwrap();
    h.app.queue.enqueue(params(&[("a", "2")])).await.unwrap();

    let err = h.app.drain.drain_once().await.unwrap_err();
    assert!(err.is_malformed());
    assert_eq!(h.app.queue.size().await.unwrap(), 1);

    let report = h.app.drain.drain_once().await.unwrap().unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(h.sink.records(), vec![params(&[("a", "2")])]);
}

#[tokio::test]
async fn max_records_spreads_a_backlog_over_several_drains() {
    let config = Config {
        drain: DrainConfig {
            max_records: Some(2),
            ..DrainConfig::default()
        },
        ..Config::default()
    };
    let h = harness(config).await;
    for n in 1..=5 {
        h.app
            .queue
            .enqueue(params(&[("n", &n.to_string())]))
            .await
            .unwrap();
    }

    let mut drains = 0;
    loop {
        let report = h.app.drain.drain_once().await.unwrap().unwrap();
        drains += 1;
        if report.exhausted {
            break;
        }
    }

    assert_eq!(drains, 3);
    assert_eq!(h.sink.len(), 5);
}

#[rstest]
#[case::check_then_put(AcquireStrategy::CheckThenPut)]
#[case::put_if_absent(AcquireStrategy::PutIfAbsent)]
#[tokio::test]
async fn both_strategies_drain_under_custom_target(#[case] strategy: AcquireStrategy) {
    let config = Config {
        table: TableTarget::new("orders", "inbox"),
        lock: LockConfig {
            key: "orders-drain".into(),
            strategy,
            ..LockConfig::default()
        },
        ..Config::default()
    };
    let h = harness(config).await;
    h.app.queue.enqueue(params(&[("id", "7")])).await.unwrap();

    let report = h.app.drain.drain_once().await.unwrap().unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(h.app.lock.key(), "orders-drain");
    assert_eq!(h.table.name(), "orders/inbox");
}
