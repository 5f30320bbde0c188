//! 🚰 The bulk sink — where single operations go in and sealed `_bulk` requests come out.
//!
//! 🎬 COLD OPEN — INT. LOADING DOCK — 4:55 PM
//!
//! One truck. One dock worker. Boxes arrive one at a time. The worker asks the same
//! question before every box: "if this goes on, does the truck go over weight?" If yes, the
//! truck leaves first and a fresh one backs in. Trucks also leave when they hit the box
//! limit, or when one has been sitting half full for too long. That's the whole job.
//!
//! 🧠 Knowledge graph:
//! - one [`BulkSink`] per sink worker, owning one open [`AccumulatorBackend`]
//! - flush = swap in a fresh accumulator, seal the old one, hand it to the shared dispatcher
//! - the dispatched work builds the body once, runs the [`ApiWrapperBackend`], and feeds the
//!   answer to the response handler, which does all the counting

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::api_wrappers::{ApiWrapper, ApiWrapperBackend};
use crate::app_config::{ConnectionConfig, IndexConfig};
use crate::bulk::{AccumulatorBackend, AccumulatorFactory, BulkAccumulator, SealedBulkRequest};
use crate::dispatch::{Dispatcher, DispatcherBackend};
use crate::documents::BulkOperation;
use crate::metrics::SinkMetrics;
use crate::response::{BulkResponse, handle_request_failure, handle_response};

/// 🚰 Batches operations into bulk requests and ships them through the dispatcher.
///
/// Single-writer. The worker that owns it is the only caller, so `&mut self` everywhere
/// and no locks. The dispatcher, wrapper, and metrics are shared with the other sinks.
#[derive(Debug)]
pub struct BulkSink {
    factory: AccumulatorFactory,
    accumulator: AccumulatorBackend,
    max_operations_per_bulk: Option<usize>,
    flush_timeout: Duration,
    last_flush: Instant,
    wrapper: Arc<ApiWrapperBackend>,
    dispatcher: Arc<DispatcherBackend>,
    metrics: Arc<SinkMetrics>,
}

impl BulkSink {
    pub fn new(
        factory: AccumulatorFactory,
        max_operations_per_bulk: Option<usize>,
        flush_timeout: Duration,
        wrapper: Arc<ApiWrapperBackend>,
        dispatcher: Arc<DispatcherBackend>,
        metrics: Arc<SinkMetrics>,
    ) -> Self {
        let accumulator = factory.new_accumulator();
        Self {
            factory,
            accumulator,
            // -- a limit of zero would flush before anything got in. treat it as "no limit".
            max_operations_per_bulk: max_operations_per_bulk.filter(|max| *max > 0),
            flush_timeout,
            last_flush: Instant::now(),
            wrapper,
            dispatcher,
            metrics,
        }
    }

    /// 🏗️ Wire a sink straight from the `[index]` and `[connection]` sections.
    pub fn from_config(
        index: &IndexConfig,
        connection: &ConnectionConfig,
        wrapper: Arc<ApiWrapperBackend>,
        dispatcher: Arc<DispatcherBackend>,
        metrics: Arc<SinkMetrics>,
    ) -> Self {
        let factory = AccumulatorFactory::new(
            index.request_params(),
            index.bulk_size_bytes(),
            index.estimation_strategy(connection),
        );
        Self::new(
            factory,
            index.max_operations_per_bulk,
            Duration::from_millis(index.flush_timeout_ms),
            wrapper,
            dispatcher,
            metrics,
        )
    }

    /// ✍️ Add one operation, flushing before and after as the batch limits demand.
    ///
    /// The size check happens *before* the add: an operation that would tip the batch over
    /// the target goes into the next batch. An operation that is too big on its own still
    /// goes out, alone.
    pub async fn write(&mut self, operation: BulkOperation) -> Result<()> {
        if !self.accumulator.is_empty() {
            let estimate = self
                .accumulator
                .estimate_size_with_operation(&operation)
                .context("💀 Could not estimate the bulk size with the next operation")?;
            if estimate >= self.factory.target_bulk_size_bytes() {
                trace!(
                    "📏 Estimate {} >= target {}, flushing before the add",
                    estimate,
                    self.factory.target_bulk_size_bytes()
                );
                self.flush().await?;
            }
        }

        self.accumulator.add_operation(operation)?;

        let at_operation_limit = self
            .max_operations_per_bulk
            .is_some_and(|max| self.accumulator.operations_count() >= max);
        if at_operation_limit || self.is_flush_due() {
            self.flush().await?;
        }
        Ok(())
    }

    /// ⏰ Flush if the current batch has been open longer than the flush timeout.
    pub async fn flush_if_due(&mut self) -> Result<()> {
        if self.is_flush_due() {
            debug!("⏰ Flush timeout elapsed with {} operations waiting", self.accumulator.operations_count());
            self.flush().await?;
        }
        Ok(())
    }

    fn is_flush_due(&self) -> bool {
        !self.accumulator.is_empty() && self.last_flush.elapsed() >= self.flush_timeout
    }

    /// ⏳ How long until the open batch is due. Callers use it to bound their idle waits.
    pub fn time_until_flush_due(&self) -> Duration {
        self.flush_timeout.saturating_sub(self.last_flush.elapsed())
    }

    /// 🚚 Seal whatever is open and hand it to the dispatcher. An empty batch is a no-op.
    ///
    /// Returns once the dispatcher has admitted the request, which may mean waiting for a
    /// free slot. It does not wait for the request itself unless the dispatcher is inline.
    pub async fn flush(&mut self) -> Result<()> {
        self.last_flush = Instant::now();
        if self.accumulator.is_empty() {
            return Ok(());
        }

        let mut open = std::mem::replace(&mut self.accumulator, self.factory.new_accumulator());
        // -- a small compressed batch may never have hit its first sample. take it now.
        if let Err(err) = open.estimated_size_bytes() {
            warn!("⚠️ Could not settle the size estimate before sealing, sending anyway: {err:#}");
        }
        let sealed = open.seal();
        debug!(
            "🚚 Sealed a bulk of {} operations, ~{} bytes estimated",
            sealed.operations_count(),
            sealed.estimated_size_bytes()
        );

        let wrapper = Arc::clone(&self.wrapper);
        let metrics = Arc::clone(&self.metrics);
        self.dispatcher
            .send_request(move |sealed| execute_bulk(wrapper, metrics, sealed), sealed)
            .await
            .context("💀 The dispatcher refused the sealed bulk request")
    }

    /// 🏁 Flush the remainder. The shared dispatcher is drained by whoever owns it.
    pub async fn close(mut self) -> Result<()> {
        self.flush().await
    }

    pub fn pending_operations(&self) -> usize {
        self.accumulator.operations_count()
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }
}

/// 📡 One sealed batch, start to finish: build, send, count.
///
/// Item-level failures are data, so a response with errors in it is still `Ok`. A whole
/// request failure is counted against every operation and then returned, so the dispatcher
/// logs it and tallies it as a failed unit of work.
async fn execute_bulk(
    wrapper: Arc<ApiWrapperBackend>,
    metrics: Arc<SinkMetrics>,
    sealed: SealedBulkRequest,
) -> Result<()> {
    let outcome: Result<BulkResponse> = async {
        let request = sealed.request()?;
        metrics.record_bulk_request_sent(request.body().len() as u64, sealed.estimated_size_bytes());
        wrapper.execute(request).await
    }
    .await;

    match outcome {
        Ok(response) => {
            let failures = handle_response(&sealed, &response, &metrics);
            trace!(
                "✅ Bulk of {} answered in {}ms, {} failures",
                sealed.operations_count(),
                response.took,
                failures.len()
            );
            Ok(())
        }
        Err(err) => {
            handle_request_failure(&sealed, &err, &metrics);
            Err(err.context(format!(
                "💀 Bulk request with {} operations failed as a whole",
                sealed.operations_count()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_wrappers::ApiWrapperKind;
    use crate::api_wrappers::test_support::in_mem;
    use crate::bulk::{BulkRequestParams, EstimationStrategy};
    use crate::documents::SerializedDocument;
    use crate::transport::InMemoryTransport;

    // -- `{"n":1}` is 7 bytes, so every op weighs 57 with the envelope fee
    fn small_op(n: u32) -> Result<BulkOperation> {
        Ok(BulkOperation::index(SerializedDocument::from_raw(format!(r#"{{"n":{n}}}"#))?).with_index("orders"))
    }

    fn sink_with(
        target_bytes: u64,
        max_ops: Option<usize>,
        flush_timeout: Duration,
    ) -> (InMemoryTransport, Arc<DispatcherBackend>, BulkSink) {
        let (tape, transport) = in_mem();
        let wrapper = Arc::new(ApiWrapperBackend::new(ApiWrapperKind::Default, transport));
        let dispatcher = Arc::new(DispatcherBackend::for_max_in_flight(1));
        let factory =
            AccumulatorFactory::new(BulkRequestParams::default(), target_bytes, EstimationStrategy::Uncompressed);
        let sink = BulkSink::new(
            factory,
            max_ops,
            flush_timeout,
            wrapper,
            Arc::clone(&dispatcher),
            Arc::new(SinkMetrics::default()),
        );
        (tape, dispatcher, sink)
    }

    fn action_lines(body: &[u8]) -> usize {
        body.split(|b| *b == b'\n').filter(|line| !line.is_empty()).count() / 2
    }

    #[tokio::test]
    async fn the_one_where_the_fifth_box_waits_for_the_next_truck() -> Result<()> {
        let (tape, _dispatcher, mut sink) = sink_with(250, None, Duration::from_secs(60));
        for n in 1..=5 {
            sink.write(small_op(n)?).await?;
        }
        // -- 4 × 57 = 228 fits, the fifth would make 285
        let calls = tape.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(action_lines(&calls[0].body), 4);
        assert_eq!(calls[0].path, "/_bulk");
        assert_eq!(sink.pending_operations(), 1);

        let metrics = Arc::clone(sink.metrics());
        sink.close().await?;
        let calls = tape.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(action_lines(&calls[1].body), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_succeeded, 5);
        assert_eq!(snapshot.bulk_requests_sent, 2);
        assert_eq!(snapshot.bytes_estimated, 5 * 57);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_giant_still_ships_alone() -> Result<()> {
        let (tape, _dispatcher, mut sink) = sink_with(60, None, Duration::from_secs(60));
        let giant = format!(r#"{{"blob":"{}"}}"#, "x".repeat(500));
        sink.write(BulkOperation::index(SerializedDocument::from_raw(giant)?)).await?;
        sink.write(small_op(1)?).await?;
        sink.close().await?;

        let calls = tape.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(action_lines(&calls[0].body), 1);
        assert_eq!(action_lines(&calls[1].body), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_operation_limit_calls_it_early() -> Result<()> {
        let (tape, _dispatcher, mut sink) = sink_with(1 << 20, Some(2), Duration::from_secs(60));
        for n in 0..5 {
            sink.write(small_op(n)?).await?;
        }
        assert_eq!(tape.calls().await.len(), 2);
        sink.close().await?;

        let sizes: Vec<_> = tape.calls().await.iter().map(|call| action_lines(&call.body)).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_half_full_truck_leaves_on_schedule() -> Result<()> {
        let (tape, _dispatcher, mut sink) = sink_with(1 << 20, None, Duration::from_secs(60));
        sink.write(small_op(1)?).await?;
        sink.flush_if_due().await?;
        assert!(tape.calls().await.is_empty());
        assert_eq!(sink.time_until_flush_due(), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(sink.time_until_flush_due(), Duration::ZERO);
        sink.flush_if_due().await?;
        assert_eq!(tape.calls().await.len(), 1);
        assert_eq!(sink.pending_operations(), 0);

        // 🧪 nothing open means nothing due, however long we sit here
        tokio::time::advance(Duration::from_secs(600)).await;
        sink.flush_if_due().await?;
        assert_eq!(tape.calls().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_store_slams_the_door_on_the_whole_batch() -> Result<()> {
        let (tape, dispatcher, mut sink) = sink_with(1 << 20, None, Duration::from_secs(60));
        tape.push_store_error(503, "cluster_block_exception").await;
        sink.write(small_op(1)?).await?;
        sink.write(small_op(2)?).await?;

        let metrics = Arc::clone(sink.metrics());
        // -- the failure is the dispatcher's to log, not ours to bubble up
        sink.close().await?;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bulk_requests_sent, 1);
        assert_eq!(snapshot.bulk_requests_failed, 1);
        assert_eq!(snapshot.documents_failed, 2);
        assert_eq!(snapshot.documents_succeeded, 0);
        assert_eq!(dispatcher.stats().failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_some_items_fail_and_the_request_still_counts_as_done() -> Result<()> {
        let (tape, dispatcher, mut sink) = sink_with(1 << 20, None, Duration::from_secs(60));
        tape.push_response(
            r#"{"took":3,"errors":true,"items":[
                {"index":{"_index":"orders","_id":"1","status":201,"_seq_no":0}},
                {"index":{"_index":"orders","_id":"2","status":400,"error":{"type":"mapper_parsing_exception","reason":"bad"}}},
                {"index":{"_index":"orders","_id":"3","status":409,"error":{"type":"version_conflict_engine_exception","reason":"old"}}}
            ]}"#,
        )
        .await;
        for n in 1..=3 {
            sink.write(small_op(n)?.with_id(n.to_string())).await?;
        }
        let metrics = Arc::clone(sink.metrics());
        sink.close().await?;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_succeeded, 1);
        assert_eq!(snapshot.documents_failed, 2);
        assert_eq!(snapshot.version_conflicts, 1);
        assert_eq!(snapshot.bulk_requests_failed, 0);
        assert_eq!(dispatcher.stats().succeeded, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_closing_an_empty_sink_sends_nothing() -> Result<()> {
        let (tape, dispatcher, sink) = sink_with(1 << 20, Some(0), Duration::from_secs(60));
        sink.close().await?;
        assert!(tape.calls().await.is_empty());
        assert_eq!(dispatcher.stats().submitted, 0);
        Ok(())
    }
}
