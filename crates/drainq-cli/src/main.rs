use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use drainq_core::app::file_media;
use drainq_core::ports::SystemClock;
use drainq_core::{
    AcquireStrategy, App, AppBuilder, Config, Lock, MalformedPolicy, Params, Queue,
};
use tracing::info;

/// Reply returned to a producer once its record is appended.
const ACK: &str = "Added to queue!";

#[derive(Parser)]
#[command(name = "drainq")]
#[command(about = "Durable work queue with a single locked consumer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root directory for tables and the lock cache
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Workbook holding the queue sheet
    #[arg(long, global = true)]
    book: Option<String>,

    /// Sheet used as the queue table
    #[arg(long, global = true)]
    sheet: Option<String>,

    /// Cache key of the drain lock
    #[arg(long, global = true)]
    lock_key: Option<String>,

    /// Lock lifetime in seconds
    #[arg(long, global = true)]
    lock_ttl_secs: Option<u64>,

    /// check-then-put | put-if-absent
    #[arg(long, global = true)]
    lock_strategy: Option<AcquireStrategy>,

    /// What to do with a record that fails to parse: discard | retain
    #[arg(long, global = true)]
    on_malformed: Option<MalformedPolicy>,

    /// Stop a drain after this many records
    #[arg(long, global = true)]
    max_records: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the configured book and sheet
    Init,
    /// Append one record built from key=value pairs
    Enqueue {
        #[arg(value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
    /// Drain the queue once under the lock
    Drain,
    /// Drain on every tick until Ctrl-C
    Run {
        /// Seconds between drains
        #[arg(long)]
        tick_secs: Option<u64>,
    },
    /// Number of records waiting
    Size,
    /// Show the head record without removing it
    Peek,
    /// Release the drain lock regardless of holder
    Unlock,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config::from_env().context("loading DRAINQ_* environment")?;

        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(book) = &self.book {
            config.table.book = book.clone();
        }
        if let Some(sheet) = &self.sheet {
            config.table.sheet = sheet.clone();
        }
        if let Some(key) = &self.lock_key {
            config.lock.key = key.clone();
        }
        if let Some(secs) = self.lock_ttl_secs {
            config.lock.ttl = Duration::from_secs(secs);
        }
        if let Some(strategy) = self.lock_strategy {
            config.lock.strategy = strategy;
        }
        if let Some(policy) = self.on_malformed {
            config.drain.on_malformed = policy;
        }
        if self.max_records.is_some() {
            config.drain.max_records = self.max_records;
        }
        if let Command::Run {
            tick_secs: Some(secs),
        } = self.command
        {
            config.drain.tick = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;

    match cli.command {
        Command::Init => {
            let (catalog, _) = file_media(&config.data_dir, Arc::new(SystemClock));
            let table = catalog.create(&config.table).await?;
            println!("initialized {} at {}", config.table, table.dir().display());
        }
        Command::Enqueue { pairs } => {
            let payload = parse_pairs(&pairs)?;
            let app = open(config).await?;
            app.queue.enqueue(payload).await?;
            println!("{ACK}");
        }
        Command::Drain => {
            let app = open(config).await?;
            match app.drain.drain_once().await? {
                Some(report) => println!(
                    "drained {} record(s) in {} ms{}",
                    report.processed,
                    report.elapsed.as_millis(),
                    if report.exhausted { "" } else { ", more waiting" }
                ),
                None => println!("lock `{}` is held, skipped", app.lock.key()),
            }
        }
        Command::Run { .. } => {
            let app = open(config).await?;
            let schedule = app.schedule();
            info!(
                table = %app.config.table,
                tick_secs = schedule.period().as_secs(),
                "running, Ctrl-C to stop"
            );
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            info!("shutting down");
            schedule.shutdown_and_join().await;
        }
        Command::Size => {
            let app = open(config).await?;
            println!("{}", app.queue.size().await?);
        }
        Command::Peek => {
            let app = open(config).await?;
            match app.queue.peek().await? {
                Some(record) => println!(
                    "{} {}",
                    record.enqueued_at.to_rfc3339(),
                    record.payload
                ),
                None => println!("(empty)"),
            }
        }
        Command::Unlock => {
            let app = open(config).await?;
            match app.lock.holder().await? {
                Some(holder) => {
                    app.lock.force_unlock().await?;
                    println!(
                        "released `{}` (held by {}, due to expire {})",
                        holder.key,
                        holder.value,
                        holder.expires_at.to_rfc3339()
                    );
                }
                None => println!("lock `{}` is not held", app.lock.key()),
            }
        }
    }

    Ok(())
}

async fn open(config: Config) -> anyhow::Result<App<Params>> {
    let target = config.table.clone();
    AppBuilder::<Params>::new(config)
        .with_file_media()
        .build()
        .await
        .with_context(|| format!("opening {target} (run `drainq init` to create it)"))
}

/// `["a=1", "b=two"]` -> `{"a": "1", "b": "two"}`. Later duplicates win.
fn parse_pairs(pairs: &[String]) -> anyhow::Result<Params> {
    let mut params = Params::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected KEY=VALUE, got `{pair}`");
        };
        if key.is_empty() {
            bail!("empty key in `{pair}`");
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_become_params() {
        let params = parse_pairs(&["a=1".into(), "b=x=y".into(), "a=2".into()]).unwrap();
        assert_eq!(params.get("a").map(String::as_str), Some("2"));
        assert_eq!(params.get("b").map(String::as_str), Some("x=y"));
    }

    #[test]
    fn pair_without_equals_is_rejected() {
        assert!(parse_pairs(&["oops".into()]).is_err());
        assert!(parse_pairs(&["=1".into()]).is_err());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "drainq",
            "--sheet",
            "inbox",
            "--lock-strategy",
            "check-then-put",
            "run",
            "--tick-secs",
            "5",
        ]);
        let config = cli.config().unwrap();
        assert_eq!(config.table.sheet, "inbox");
        assert_eq!(config.lock.strategy, AcquireStrategy::CheckThenPut);
        assert_eq!(config.drain.tick, Duration::from_secs(5));
    }
}
