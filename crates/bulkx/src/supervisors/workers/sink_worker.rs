//! 🎬 *[a channel fills with pages. somewhere, a sink waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🗑️ The SinkWorker: patient, tireless, and deeply unbothered by the chaos upstream.
//! It receives pages, splits them into records, encodes each record into a bulk operation,
//! and hands it to its `BulkSink`. While it waits for the next page it keeps one eye on the
//! clock, because a half-full batch shouldn't sit around forever just because the source
//! went quiet.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Worker;
use crate::documents::DocumentEncoder;
use crate::sink::BulkSink;

#[derive(Debug)]
pub(crate) struct SinkWorker {
    rx: Receiver<String>,
    encoder: Arc<DocumentEncoder>,
    sink: BulkSink,
}

impl SinkWorker {
    pub(crate) fn new(rx: Receiver<String>, encoder: Arc<DocumentEncoder>, sink: BulkSink) -> Self {
        Self { rx, encoder, sink }
    }

    /// 📨 One page in, one operation per record out.
    ///
    /// A record that won't encode is counted as a failed document and skipped. One bad
    /// line in a million-line file is not a reason to stop the other 999,999.
    async fn sink_page(&mut self, page: &str) -> Result<()> {
        for record in records(page) {
            match self.encoder.encode(record) {
                Ok(operation) => self
                    .sink
                    .write(operation)
                    .await
                    .context("💀 SinkWorker failed to write an operation into its bulk sink")?,
                Err(err) => {
                    warn!("💀 Skipping a record that won't encode: {err:#}");
                    self.sink.metrics().record_document_failed();
                }
            }
        }
        Ok(())
    }
}

/// ✂️ Split a page on `\n` (memchr does the scanning) and drop blank lines.
fn records(page: &str) -> impl Iterator<Item = &str> {
    let mut start = 0;
    memchr::memchr_iter(b'\n', page.as_bytes())
        .chain(std::iter::once(page.len()))
        .filter_map(move |end| {
            let line = page[start..end].trim_end_matches('\r');
            start = end + 1;
            (!line.trim().is_empty()).then_some(line)
        })
}

impl Worker for SinkWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("📥 SinkWorker started draining channel...");
            loop {
                // -- with something open, wait no longer than its flush deadline
                let received = if self.sink.pending_operations() == 0 {
                    Some(self.rx.recv().await)
                } else {
                    tokio::time::timeout(self.sink.time_until_flush_due(), self.rx.recv())
                        .await
                        .ok()
                };

                match received {
                    Some(Ok(page)) => self.sink_page(&page).await?,
                    Some(Err(_)) => {
                        // Channel is empty and closed
                        debug!("🏁 SinkWorker: Channel closed. Flushing and shutting down.");
                        self.sink.close().await.context("💀 SinkWorker failed to close its bulk sink")?;
                        return Ok(());
                    }
                    None => self
                        .sink
                        .flush_if_due()
                        .await
                        .context("💀 SinkWorker failed a timed flush")?,
                }
            }
        })
    }
}
