//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where workers toil endlessly..."
//! 🎬 "One supervisor dared to manage them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor module — part middle manager, part helicopter parent.
//! It wires one run together: one source worker, `sink_parallelism` sink workers, one
//! shared dispatcher, one shared set of metrics. Then it waits for all of them, drains the
//! dispatcher, and writes the report card.
//!
//! ⚠️ DO NOT MAKE THE WORKERS PUB EVER
//! 🔒 Like Fight Club, but for async tasks. First rule: you don't pub the workers.

mod workers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{error, info};

use crate::api_wrappers::ApiWrapperBackend;
use crate::app_config::AppConfig;
use crate::dispatch::{DispatchSnapshot, Dispatcher, DispatcherBackend};
use crate::documents::DocumentEncoder;
use crate::metrics::{MetricsSnapshot, SinkMetrics};
use crate::sink::BulkSink;
use crate::source::{FileSource, SourceBackend};
use crate::transport::TransportBackend;
use workers::{SinkWorker, SourceWorker, Worker};

/// 📋 What a finished run has to show for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub metrics: MetricsSnapshot,
    pub dispatch: DispatchSnapshot,
    pub elapsed: Duration,
}

/// 📦 The Supervisor: because even async tasks need someone hovering over them
/// asking "is it done yet?"
pub(crate) struct Supervisor {
    app_config: AppConfig,
    transport: Arc<TransportBackend>,
}

impl Supervisor {
    pub(crate) fn new(app_config: AppConfig, transport: TransportBackend) -> Self {
        Self {
            app_config,
            transport: Arc::new(transport),
        }
    }

    /// 🧵 Run the file in `[source]` through to the store.
    pub(crate) async fn run(self) -> Result<RunSummary> {
        let source = FileSource::new(self.app_config.source.clone())
            .await
            .context("💀 Supervisor could not open the source")?;
        self.run_source(SourceBackend::File(source)).await
    }

    /// 🧵 Unleash the workers on any source, wait for every last one, then drain.
    pub(crate) async fn run_source(self, source: SourceBackend) -> Result<RunSummary> {
        let started = Instant::now();
        let AppConfig {
            connection,
            index,
            runtime,
            ..
        } = &self.app_config;

        let metrics = Arc::new(SinkMetrics::default());
        let dispatcher = Arc::new(DispatcherBackend::for_max_in_flight(runtime.max_in_flight_requests));
        let wrapper = Arc::new(ApiWrapperBackend::new(
            index.api_wrapper_kind(),
            Arc::clone(&self.transport),
        ));
        let encoder = Arc::new(DocumentEncoder::new(index.encoder_config()));
        let (tx, rx) = async_channel::bounded(runtime.queue_capacity.max(1));

        info!(
            "🚀 Starting {} sink workers, {} max in-flight requests, {:?} api",
            runtime.sink_parallelism.max(1),
            runtime.max_in_flight_requests.max(1),
            wrapper.kind()
        );

        let mut handles = Vec::with_capacity(runtime.sink_parallelism.max(1) + 1);
        for _ in 0..runtime.sink_parallelism.max(1) {
            let sink = BulkSink::from_config(
                index,
                connection,
                Arc::clone(&wrapper),
                Arc::clone(&dispatcher),
                Arc::clone(&metrics),
            );
            handles.push(SinkWorker::new(rx.clone(), Arc::clone(&encoder), sink).start());
        }
        // -- the workers hold their own clones. ours would keep the channel open forever.
        drop(rx);
        handles.push(SourceWorker::new(tx, source).start());

        let mut first_failure = None;
        for handle in handles {
            let failure = match handle.await {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join_error) => anyhow!("💥 A worker panicked or was cancelled: {join_error}"),
            };
            error!("💀 Worker failed: {failure:#}");
            first_failure.get_or_insert(failure);
        }

        // 🏁 every sink has flushed; now wait for what they left in flight
        dispatcher
            .close()
            .await
            .context("💀 Failed draining in-flight bulk requests")?;

        if let Some(failure) = first_failure {
            return Err(failure.context("💀 The run did not finish cleanly"));
        }

        let summary = RunSummary {
            metrics: metrics.snapshot(),
            dispatch: dispatcher.stats(),
            elapsed: started.elapsed(),
        };
        info!(
            "✅ Run finished in {:?}: {} documents succeeded, {} failed, {} bulk requests",
            summary.elapsed,
            summary.metrics.documents_succeeded,
            summary.metrics.documents_failed,
            summary.metrics.bulk_requests_sent
        );
        Ok(summary)
    }
}
