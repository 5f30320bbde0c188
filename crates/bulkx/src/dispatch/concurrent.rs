use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::dispatch::{DispatchSnapshot, DispatchStats, Dispatcher, Outcome};
use crate::error::BulkError;

/// 🏊 A bounded pool of in-flight bulk requests.
///
/// The `JoinSet` is the pool and its completion queue in one. It lives behind an async mutex
/// so admission is serialized: whoever holds the lock either finds a free slot or waits on
/// `join_next` (still holding it) until one frees up. Everyone else queues behind the lock.
/// That queue is the backpressure.
#[derive(Debug)]
pub struct ConcurrentDispatcher {
    concurrency: usize,
    in_flight: Mutex<JoinSet<Result<()>>>,
    closed: AtomicBool,
    stats: DispatchStats,
}

impl ConcurrentDispatcher {
    /// 🏗️ A concurrency of 0 would deadlock the first caller, so it becomes 1.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            in_flight: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
            stats: DispatchStats::default(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 🧹 Reap whatever already finished, without waiting on anything.
    fn prune(&self, in_flight: &mut JoinSet<Result<()>>) {
        while let Some(joined) = in_flight.try_join_next() {
            self.stats.observe(Outcome::from(joined));
        }
    }

    async fn drain(&self, in_flight: &mut JoinSet<Result<()>>) {
        while let Some(joined) = in_flight.join_next().await {
            self.stats.observe(Outcome::from(joined));
        }
    }
}

#[async_trait]
impl Dispatcher for ConcurrentDispatcher {
    async fn send_request<R, F, Fut>(&self, execute: F, request: R) -> Result<()>
    where
        R: Send + 'static,
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(BulkError::contract("send_request called on a closed dispatcher").into());
        }

        let mut in_flight = self.in_flight.lock().await;
        // -- close() may have won the race for the lock while we queued
        if self.closed.load(Ordering::Acquire) {
            return Err(BulkError::contract("send_request called on a closed dispatcher").into());
        }
        self.prune(&mut in_flight);
        while in_flight.len() >= self.concurrency {
            trace!("🚦 {} requests in flight, waiting for a slot", in_flight.len());
            match in_flight.join_next().await {
                Some(joined) => self.stats.observe(Outcome::from(joined)),
                None => break,
            }
            self.prune(&mut in_flight);
        }

        in_flight.spawn(async move { execute(request).await });
        self.stats.record_submitted();
        Ok(())
    }

    /// 🏁 Wait for every in-flight request, then refuse new ones.
    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let mut in_flight = self.in_flight.lock().await;
        debug!("🏁 Draining {} in-flight requests", in_flight.len());
        self.drain(&mut in_flight).await;
        Ok(())
    }

    /// 🛑 Abort everything in flight. Cancelled work is still reaped and logged, one by one.
    async fn cancel_all(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let mut in_flight = self.in_flight.lock().await;
        debug!("🛑 Cancelling {} in-flight requests", in_flight.len());
        in_flight.abort_all();
        self.drain(&mut in_flight).await;
        Ok(())
    }

    fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }
}
