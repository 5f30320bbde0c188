use anyhow::{Context, Result};
use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::debug;

use super::Worker;
use crate::source::{Source, SourceBackend};

/// 🚰 Pulls pages out of a source and pushes them down the channel.
///
/// A bounded channel, so a slow sink side parks this worker on `send`. Dropping the
/// sender at the end is what tells the sink workers there is nothing more coming.
#[derive(Debug)]
pub(crate) struct SourceWorker {
    tx: Sender<String>,
    source: SourceBackend,
}

impl SourceWorker {
    pub(crate) fn new(tx: Sender<String>, source: SourceBackend) -> Self {
        Self { tx, source }
    }
}

impl Worker for SourceWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let mut pages_sent = 0u64;
            while let Some(page) = self
                .source
                .next_page()
                .await
                .context("💀 SourceWorker failed to read the next page")?
            {
                self.tx
                    .send(page)
                    .await
                    .context("💀 SourceWorker had a page but every sink worker had already hung up")?;
                pages_sent += 1;
            }
            debug!("🏁 SourceWorker: source ran dry after {} pages. Closing the channel.", pages_sent);
            self.tx.close();
            Ok(())
        })
    }
}
