//! 🚦 Dispatch — bounded concurrency for sealed bulk requests.
//!
//! 🎬 COLD OPEN — INT. AIRPORT SECURITY — PEAK HOUR
//!
//! Four lanes. Four scanners. A hundred travelers. Nobody gets to stand in a fifth lane that
//! doesn't exist; they wait at the rope until a lane frees up. That rope is
//! [`Dispatcher::send_request`], and the waiting is the only backpressure this crate has.
//! Upstream readers stall, memory stays bounded, nobody queues unbounded bulk bodies in RAM.
//!
//! 🧠 Knowledge graph:
//! - trait [`Dispatcher`] → [`ConcurrentDispatcher`] (JoinSet behind an async mutex) /
//!   [`InlineDispatcher`] (runs on the caller) → [`DispatcherBackend`] enum
//! - every unit of work's outcome is observed exactly once: success, error, panic, or
//!   cancellation. Errors are logged and counted here, never re-thrown to the caller of
//!   `send_request`. One bad batch does not close the rope for everyone else.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinError;
use tracing::{error, trace, warn};

pub mod concurrent;
pub mod inline;

pub use concurrent::ConcurrentDispatcher;
pub use inline::InlineDispatcher;

/// 🚦 Runs units of work under a concurrency bound.
///
/// # Contract 📜
/// - `send_request(execute, request)` schedules `execute(request)` and returns once it has a
///   slot. It waits (asynchronously) while the pool is saturated.
/// - Failures of the work itself are observed and logged by the dispatcher and do not
///   surface from `send_request`. It only fails if the dispatcher is already closed.
/// - `close` waits for everything in flight. `cancel_all` aborts everything in flight.
///   Both observe every outcome before returning.
#[async_trait]
pub trait Dispatcher: std::fmt::Debug + Send + Sync {
    async fn send_request<R, F, Fut>(&self, execute: F, request: R) -> Result<()>
    where
        R: Send + 'static,
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static;

    async fn close(&self) -> Result<()>;

    async fn cancel_all(&self) -> Result<()>;

    fn stats(&self) -> DispatchSnapshot;
}

/// 🎭 Pick-one dispatcher, chosen from `runtime.max_in_flight_requests` (1 means inline).
#[derive(Debug)]
pub enum DispatcherBackend {
    Concurrent(ConcurrentDispatcher),
    Inline(InlineDispatcher),
}

impl DispatcherBackend {
    pub fn for_max_in_flight(max_in_flight_requests: usize) -> Self {
        if max_in_flight_requests <= 1 {
            DispatcherBackend::Inline(InlineDispatcher::new())
        } else {
            DispatcherBackend::Concurrent(ConcurrentDispatcher::new(max_in_flight_requests))
        }
    }
}

#[async_trait]
impl Dispatcher for DispatcherBackend {
    async fn send_request<R, F, Fut>(&self, execute: F, request: R) -> Result<()>
    where
        R: Send + 'static,
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        match self {
            DispatcherBackend::Concurrent(dispatcher) => dispatcher.send_request(execute, request).await,
            DispatcherBackend::Inline(dispatcher) => dispatcher.send_request(execute, request).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            DispatcherBackend::Concurrent(dispatcher) => dispatcher.close().await,
            DispatcherBackend::Inline(dispatcher) => dispatcher.close().await,
        }
    }

    async fn cancel_all(&self) -> Result<()> {
        match self {
            DispatcherBackend::Concurrent(dispatcher) => dispatcher.cancel_all().await,
            DispatcherBackend::Inline(dispatcher) => dispatcher.cancel_all().await,
        }
    }

    fn stats(&self) -> DispatchSnapshot {
        match self {
            DispatcherBackend::Concurrent(dispatcher) => dispatcher.stats(),
            DispatcherBackend::Inline(dispatcher) => dispatcher.stats(),
        }
    }
}

/// 🎲 How a unit of work ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Finished(Result<()>),
    Panicked(String),
    Cancelled,
}

impl From<Result<Result<()>, JoinError>> for Outcome {
    fn from(joined: Result<Result<()>, JoinError>) -> Self {
        match joined {
            Ok(result) => Outcome::Finished(result),
            Err(join_error) if join_error.is_cancelled() => Outcome::Cancelled,
            Err(join_error) => Outcome::Panicked(join_error.to_string()),
        }
    }
}

/// 📋 Outcome tallies. Every submitted unit lands in exactly one of the outcome buckets.
#[derive(Debug, Default)]
pub(crate) struct DispatchStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    cancelled: AtomicU64,
}

/// 📸 Copy of the dispatcher's tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub cancelled: u64,
}

impl DispatchSnapshot {
    pub fn observed(&self) -> u64 {
        self.succeeded + self.failed + self.panicked + self.cancelled
    }
}

impl DispatchStats {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// 👁️ The one place an outcome gets looked at. Called exactly once per unit of work.
    pub(crate) fn observe(&self, outcome: Outcome) {
        match outcome {
            Outcome::Finished(Ok(())) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                trace!("✅ Dispatched work finished");
            }
            Outcome::Finished(Err(err)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!("💀 Dispatched bulk work failed: {err:#}");
            }
            Outcome::Cancelled => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                warn!("🛑 Dispatched bulk work was cancelled before it finished");
            }
            Outcome::Panicked(message) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                error!("💥 Dispatched bulk work panicked: {message}");
            }
        }
    }

    pub(crate) fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
