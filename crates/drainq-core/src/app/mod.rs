//! App - composes ports into the running consumer
//!
//! - **AppBuilder**: wiring and fail-fast validation
//! - **DrainLoop**: lock, drain into a sink, unlock
//! - **TickLoop**: periodic scheduling with graceful shutdown

pub mod builder;
pub mod drain;
pub mod tick_loop;

pub use self::builder::{App, AppBuilder, BuildError, file_media};
pub use self::drain::{DrainLoop, DrainReport};
pub use self::tick_loop::{PeriodicTask, TickLoop};
