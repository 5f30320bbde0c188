use std::future::Future;
use std::panic::AssertUnwindSafe;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;

use crate::dispatch::{DispatchSnapshot, DispatchStats, Dispatcher, Outcome};

/// 🐢 No pool, no lanes. The work runs right here, on whoever called `send_request`.
///
/// Same contract as the concurrent dispatcher: failures and panics are observed and logged,
/// never handed back to the caller. Natural backpressure, since the caller can't do anything
/// else until the request is done.
#[derive(Debug, Default)]
pub struct InlineDispatcher {
    stats: DispatchStats,
}

impl InlineDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[async_trait]
impl Dispatcher for InlineDispatcher {
    async fn send_request<R, F, Fut>(&self, execute: F, request: R) -> Result<()>
    where
        R: Send + 'static,
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stats.record_submitted();
        let outcome = match AssertUnwindSafe(execute(request)).catch_unwind().await {
            Ok(result) => Outcome::Finished(result),
            Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
        };
        self.stats.observe(outcome);
        Ok(())
    }

    /// Nothing is ever in flight once `send_request` returns.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn the_one_where_the_work_is_done_before_we_return() -> Result<()> {
        let dispatcher = InlineDispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        dispatcher
            .send_request(
                move |amount: usize| async move {
                    counter.fetch_add(amount, Ordering::SeqCst);
                    Ok(())
                },
                3,
            )
            .await?;
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_failures_are_swallowed_but_counted() -> Result<()> {
        let dispatcher = InlineDispatcher::new();
        dispatcher
            .send_request(|()| async { Err(anyhow::anyhow!("nope")) }, ())
            .await?;
        dispatcher
            .send_request(
                |fail: bool| async move {
                    if fail {
                        panic!("🧪 deliberate test panic");
                    }
                    Ok(())
                },
                true,
            )
            .await?;

        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.observed(), stats.submitted);
        Ok(())
    }
}
