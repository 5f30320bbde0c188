//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all the credit
//! in the sprint retro.
//!
//! 🚀 One source worker fills the channel with pages. N sink workers drain it, each one
//! feeding its own `BulkSink`. When the source runs dry it closes the channel, the sinks
//! flush what they hold, and everybody goes home. 🦆

use anyhow::Result;
use tokio::task::JoinHandle;

mod sink_worker;
mod source_worker;

pub(crate) use sink_worker::SinkWorker;
pub(crate) use source_worker::SourceWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" — Seinfeld, on Rust
pub(crate) trait Worker {
    /// 🚀 Start the worker. Returns a JoinHandle because we trust but verify.
    fn start(self) -> JoinHandle<Result<()>>;
}
