use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;

use crate::api_wrappers::ApiWrapper;
use crate::bulk::BulkRequest;
use crate::response::BulkResponse;
use crate::transport::{Transport, TransportBackend, parse_bulk_response};

pub const DETECTOR_RUN_PATH: &str = "/_plugins/_security_analytics/detectors/run";

/// 🔪 Only the fields the response handler reads. Everything else stays on the server.
pub const DETECTOR_RUN_FILTER_PATH: &str =
    "errors,took,items.*.error,items.*.status,items.*._index,items.*._id";

/// 🕵️ Runs detectors over the batch instead of (just) indexing it.
///
/// Same NDJSON body as a regular bulk, different door. The response comes back through the
/// raw `perform` call and gets parsed here, since it never went through the typed bulk path.
#[derive(Debug)]
pub struct DetectorRunApiWrapper {
    transport: Arc<TransportBackend>,
}

impl DetectorRunApiWrapper {
    pub fn new(transport: Arc<TransportBackend>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ApiWrapper for DetectorRunApiWrapper {
    async fn execute(&self, request: &BulkRequest) -> Result<BulkResponse> {
        let params = [("filter_path", DETECTOR_RUN_FILTER_PATH.to_string())];
        let raw = self
            .transport
            .perform(Method::POST, DETECTOR_RUN_PATH, &params, Some(request.body()))
            .await
            .context("💀 Detector run call failed")?;
        parse_bulk_response(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_wrappers::test_support::{in_mem, sealed};
    use crate::bulk::BulkRequestParams;
    use crate::documents::{BulkOperation, SerializedDocument};

    #[tokio::test]
    async fn the_one_where_the_bulk_body_takes_the_side_entrance() -> Result<()> {
        let (tape, transport) = in_mem();
        // -- what the store sends back after filter_path has had its way
        tape.push_response(
            r#"{"took":4,"errors":true,"items":[{"index":{"_index":"logs","_id":"9","status":400,"error":{"type":"x"}}}]}"#,
        )
        .await;
        let wrapper = DetectorRunApiWrapper::new(transport);
        let sealed = sealed(
            BulkRequestParams {
                refresh: Some(crate::bulk::Refresh::True),
                ..Default::default()
            },
            vec![BulkOperation::index(SerializedDocument::from_raw("{}")?).with_index("logs")],
        )?;

        let response = wrapper.execute(sealed.request()?).await?;
        assert!(response.errors);
        assert!(response.items[0].is_in_error());

        let calls = tape.calls().await;
        assert_eq!(calls[0].path, DETECTOR_RUN_PATH);
        assert_eq!(calls[0].param("filter_path"), Some(DETECTOR_RUN_FILTER_PATH));
        // 🧪 request-level params don't follow the body through this door
        assert_eq!(calls[0].param("refresh"), None);
        assert_eq!(calls[0].body, sealed.request()?.body());
        Ok(())
    }
}
