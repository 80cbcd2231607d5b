//! Lock module: TTL-bounded mutual exclusion and scoped acquisition.

mod cache_lock;

pub use cache_lock::CacheLock;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::error::{DrainqError, Result};

/// Lock port (interface).
///
/// `lock` never blocks or retries: it either takes the lock now or reports
/// that someone else holds it.
#[async_trait]
pub trait Lock: Send + Sync {
    fn key(&self) -> &str;

    /// Try to acquire. `Ok(false)` means the lock is already held.
    async fn lock(&self) -> Result<bool>;

    /// Release a lock taken by this holder. Releasing a free lock, or one
    /// held by someone else, is a no-op.
    async fn unlock(&self) -> Result<()>;
}

/// How `lock()` decides the lock is free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AcquireStrategy {
    /// Read, then write if absent. Two callers can both see "absent" and
    /// both acquire; exclusion is advisory.
    CheckThenPut,
    /// Single conditional write on the cache.
    #[default]
    PutIfAbsent,
}

impl AcquireStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckThenPut => "check-then-put",
            Self::PutIfAbsent => "put-if-absent",
        }
    }
}

impl fmt::Display for AcquireStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquireStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "check-then-put" => Ok(Self::CheckThenPut),
            "put-if-absent" => Ok(Self::PutIfAbsent),
            other => Err(format!(
                "unknown lock strategy `{other}` (expected check-then-put|put-if-absent)"
            )),
        }
    }
}

/// Run `work` while holding `lock`.
///
/// Returns `Ok(None)` without running `work` when the lock is held elsewhere.
/// Otherwise the lock is released after `work` finishes, whether it returned
/// a value, returned an error, or panicked. A panic is resumed after release.
///
/// When both `work` and the release fail, the error from `work` wins and the
/// release failure is logged; the lock then lapses with its TTL.
#[tracing::instrument(level = "debug", skip_all, fields(key = lock.key()))]
pub async fn run_with_lock<L, F, Fut, T, E>(lock: &L, work: F) -> std::result::Result<Option<T>, E>
where
    L: Lock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<DrainqError>,
{
    if !lock.lock().await? {
        debug!("lock held elsewhere, skipping work");
        return Ok(None);
    }

    let outcome = AssertUnwindSafe(work()).catch_unwind().await;
    let released = lock.unlock().await;

    match outcome {
        Err(panic) => {
            if let Err(err) = released {
                warn!(error = %err, "release after panic failed");
            }
            std::panic::resume_unwind(panic)
        }
        Ok(Err(err)) => {
            if let Err(release_err) = released {
                warn!(error = %release_err, "release after failed work failed");
            }
            Err(err)
        }
        Ok(Ok(value)) => {
            released?;
            Ok(Some(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("check-then-put", AcquireStrategy::CheckThenPut)]
    #[case("PUT-IF-ABSENT", AcquireStrategy::PutIfAbsent)]
    fn strategy_parses(#[case] raw: &str, #[case] expected: AcquireStrategy) {
        assert_eq!(raw.parse::<AcquireStrategy>().unwrap(), expected);
    }

    #[test]
    fn strategy_display_round_trips() {
        for strategy in [AcquireStrategy::CheckThenPut, AcquireStrategy::PutIfAbsent] {
            assert_eq!(strategy.to_string().parse::<AcquireStrategy>().unwrap(), strategy);
        }
    }
}
